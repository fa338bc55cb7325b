//! Remote credentials and request state, persisted in the target database.
//!
//! Both live in the database's own parameter store, so a later run (or a
//! restored copy of the database) resumes the protocol where it stopped.

use crate::error::{EngineError, EngineResult};
use crate::remote::service::{TransferAccess, TransferTicket};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use wp_core::RemoteConfig;
use wp_db::ConfigStore;

/// Parameter keys.
pub mod keys {
    pub const CONTRACT: &str = "database.enterprise_code";
    pub const OPERATOR_EMAIL: &str = "database.upgrade.operator.email";
    pub const PRIVATE_KEY: &str = "database.upgrade.operator.private_key";
    pub const PUBLIC_KEY: &str = "database.upgrade.operator.public_key";
    pub const REQUEST_ID: &str = "database.upgrade.service.request_id";
    pub const TOKEN: &str = "database.upgrade.service.token";
    pub const HOSTNAME: &str = "database.upgrade.service.transfer_hostname";
    pub const PORT: &str = "database.upgrade.service.transfer_port";
    pub const USER: &str = "database.upgrade.service.transfer_user";
    pub const STAGE: &str = "database.upgrade.service.stage";

    pub(crate) const REQUEST_KEYS: [&str; 6] = [REQUEST_ID, TOKEN, HOSTNAME, PORT, USER, STAGE];
}

/// Identity presented to the upgrade service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub contract: String,
    pub email: String,
    /// Base64 ed25519 verifying key
    pub public_key: String,
    /// Base64 ed25519 secret key
    pub private_key: String,
}

impl ServiceCredentials {
    /// Resolve credentials, generating and persisting a keypair on first use.
    ///
    /// `remote.contract` and `remote.email` take precedence over the stored
    /// values.
    pub fn load(store: &ConfigStore<'_>, remote: &RemoteConfig) -> EngineResult<Self> {
        let contract = match &remote.contract {
            Some(contract) => contract.clone(),
            None => store.get(keys::CONTRACT)?.ok_or_else(|| EngineError::Credentials {
                message: format!("no contract code: set remote.contract or {}", keys::CONTRACT),
            })?,
        };
        let email = match &remote.email {
            Some(email) => email.clone(),
            None => store
                .get(keys::OPERATOR_EMAIL)?
                .ok_or_else(|| EngineError::Credentials {
                    message: format!("no operator email: set remote.email or {}", keys::OPERATOR_EMAIL),
                })?,
        };

        let credentials = match (store.get(keys::PUBLIC_KEY)?, store.get(keys::PRIVATE_KEY)?) {
            (Some(public_key), Some(private_key)) => Self {
                contract,
                email,
                public_key,
                private_key,
            },
            _ => {
                log::info!("No operator keypair in the database, generating one");
                let (public_key, private_key) = generate_keypair();
                let credentials = Self {
                    contract,
                    email,
                    public_key,
                    private_key,
                };
                credentials.save(store)?;
                credentials
            }
        };
        credentials.signing_key()?;
        Ok(credentials)
    }

    /// Persist the keypair.
    pub fn save(&self, store: &ConfigStore<'_>) -> EngineResult<()> {
        store.set(keys::PUBLIC_KEY, &self.public_key)?;
        store.set(keys::PRIVATE_KEY, &self.private_key)?;
        Ok(())
    }

    fn signing_key(&self) -> EngineResult<SigningKey> {
        let bytes = STANDARD
            .decode(self.private_key.trim())
            .map_err(|e| EngineError::Credentials {
                message: format!("operator private key is not base64: {e}"),
            })?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| EngineError::Credentials {
            message: "operator private key must be 32 bytes".to_string(),
        })?;
        Ok(SigningKey::from_bytes(&seed))
    }

    /// Base64 signature of `message` with the operator key.
    pub fn sign(&self, message: &[u8]) -> EngineResult<String> {
        let signing_key = self.signing_key()?;
        Ok(encode_signature(&signing_key, message))
    }

    /// Signing function for transfer requests, with the key decoded once.
    pub fn signer(&self) -> EngineResult<impl Fn(&[u8]) -> String + Send + Sync> {
        let signing_key = self.signing_key()?;
        Ok(move |message: &[u8]| encode_signature(&signing_key, message))
    }
}

fn encode_signature(signing_key: &SigningKey, message: &[u8]) -> String {
    STANDARD.encode(signing_key.sign(message).to_bytes())
}

/// Fresh ed25519 keypair as `(public, private)`, base64 encoded.
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    (
        STANDARD.encode(signing_key.verifying_key().to_bytes()),
        STANDARD.encode(signing_key.to_bytes()),
    )
}

/// How far an upgrade request got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestStage {
    /// Request opened, nothing uploaded yet
    Created,
    /// Snapshot fully uploaded
    Uploaded,
    /// Processing triggered
    Processing,
}

impl RequestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStage::Created => "created",
            RequestStage::Uploaded => "uploaded",
            RequestStage::Processing => "processing",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "created" => Some(RequestStage::Created),
            "uploaded" => Some(RequestStage::Uploaded),
            "processing" => Some(RequestStage::Processing),
            _ => None,
        }
    }
}

/// An in-flight upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState {
    pub ticket: TransferTicket,
    pub access: Option<TransferAccess>,
    pub stage: RequestStage,
}

impl RequestState {
    pub fn new(ticket: TransferTicket) -> Self {
        Self {
            ticket,
            access: None,
            stage: RequestStage::Created,
        }
    }

    /// The persisted request, if any.
    pub fn load(store: &ConfigStore<'_>) -> EngineResult<Option<Self>> {
        let (Some(request_id), Some(key)) = (store.get(keys::REQUEST_ID)?, store.get(keys::TOKEN)?)
        else {
            return Ok(None);
        };
        let request_id = request_id.parse::<i64>().map_err(|e| EngineError::Credentials {
            message: format!("stored request id '{request_id}' is invalid: {e}"),
        })?;

        let access = match (
            store.get(keys::HOSTNAME)?,
            store.get(keys::PORT)?,
            store.get(keys::USER)?,
        ) {
            (Some(hostname), Some(port), Some(user)) => Some(TransferAccess {
                hostname,
                port: port.parse().map_err(|e| EngineError::Credentials {
                    message: format!("stored transfer port '{port}' is invalid: {e}"),
                })?,
                user,
            }),
            _ => None,
        };
        let stage = store
            .get(keys::STAGE)?
            .as_deref()
            .and_then(RequestStage::from_name)
            .unwrap_or(RequestStage::Created);

        Ok(Some(Self {
            ticket: TransferTicket { request_id, key },
            access,
            stage,
        }))
    }

    /// Persist the request.
    pub fn save(&self, store: &ConfigStore<'_>) -> EngineResult<()> {
        store.set(keys::REQUEST_ID, &self.ticket.request_id.to_string())?;
        store.set(keys::TOKEN, &self.ticket.key)?;
        match &self.access {
            Some(access) => {
                store.set(keys::HOSTNAME, &access.hostname)?;
                store.set(keys::PORT, &access.port.to_string())?;
                store.set(keys::USER, &access.user)?;
            }
            None => {
                store.unset(keys::HOSTNAME)?;
                store.unset(keys::PORT)?;
                store.unset(keys::USER)?;
            }
        }
        store.set(keys::STAGE, self.stage.as_str())?;
        Ok(())
    }

    /// Forget the persisted request.
    pub fn clear(store: &ConfigStore<'_>) -> EngineResult<()> {
        for key in keys::REQUEST_KEYS {
            store.unset(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
