//! Upgrade service protocol and its HTTP client.
//!
//! Control calls go to `{base_url}/database/v1/{endpoint}` with query
//! parameters and answer with JSON. A body containing `failures` is an error.
//! Snapshot bytes move over the transfer endpoint granted by
//! `request_transfer_access`, in signed chunks.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying the base64 ed25519 signature of a transfer request.
pub const SIGNATURE_HEADER: &str = "X-Waypoint-Signature";

const API_PREFIX: &str = "database/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Parameters of a new upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRequest {
    pub contract: String,
    pub email: String,
    /// Target application release
    pub target: String,
    /// `test` or `production`
    pub aim: String,
    /// Name of the uploaded snapshot file
    pub filename: String,
}

/// Identifies a request on the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTicket {
    #[serde(rename = "request")]
    pub request_id: i64,
    pub key: String,
}

/// Where and as whom snapshot bytes are transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAccess {
    pub hostname: String,
    #[serde(rename = "transfer_port")]
    pub port: u16,
    #[serde(rename = "transfer_user")]
    pub user: String,
}

impl TransferAccess {
    fn base_url(&self, ticket: &TransferTicket) -> String {
        format!(
            "https://{}:{}/transfer/{}/{}",
            self.hostname, self.port, self.user, ticket.request_id
        )
    }
}

/// Processing state reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Accepted, not processed yet
    Pending,
    /// Being processed
    Progress,
    /// Upgraded database is ready for download
    Done,
    /// Processing failed
    Failed(String),
    /// Request was cancelled on the service side
    Cancelled,
}

impl RequestStatus {
    /// Map a raw `state` value. Unknown states are a service error.
    pub fn from_state(state: &str, reason: Option<String>) -> EngineResult<Self> {
        let status = match state {
            "done" => RequestStatus::Done,
            "failed" => {
                RequestStatus::Failed(reason.unwrap_or_else(|| "no reason given".to_string()))
            }
            "cancelled" => RequestStatus::Cancelled,
            "pending" => RequestStatus::Pending,
            "progress" | "processing" => RequestStatus::Progress,
            other => {
                return Err(EngineError::Service {
                    message: format!("unknown request state '{other}'"),
                })
            }
        };
        Ok(status)
    }
}

/// Calls of the upgrade service protocol.
#[async_trait]
pub trait UpgradeService: Send + Sync {
    /// Open a new upgrade request.
    async fn create(&self, request: &CreateRequest) -> EngineResult<TransferTicket>;

    /// Register `public_key` and obtain transfer access.
    async fn request_transfer_access(
        &self,
        ticket: &TransferTicket,
        public_key: &str,
    ) -> EngineResult<TransferAccess>;

    /// Bytes of the snapshot already stored by the service.
    async fn uploaded_size(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
    ) -> EngineResult<u64>;

    /// Store `chunk` at `offset`.
    async fn upload_chunk(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
        offset: u64,
        chunk: &[u8],
        signature: &str,
    ) -> EngineResult<()>;

    /// Start processing the uploaded snapshot.
    async fn process(&self, ticket: &TransferTicket) -> EngineResult<()>;

    /// Current processing state.
    async fn status(&self, ticket: &TransferTicket) -> EngineResult<RequestStatus>;

    /// Size of the upgraded snapshot.
    async fn result_size(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
    ) -> EngineResult<u64>;

    /// Read up to `len` bytes of the upgraded snapshot at `offset`.
    async fn download_chunk(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
        offset: u64,
        len: usize,
        signature: &str,
    ) -> EngineResult<Vec<u8>>;
}

/// Envelope of every control response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    failures: Option<serde_json::Value>,
    request: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    state: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SizeBody {
    size: u64,
}

/// [`UpgradeService`] over HTTPS.
pub struct HttpUpgradeService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpgradeService {
    pub fn new(base_url: &str) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("waypoint/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{API_PREFIX}/{name}", self.base_url)
    }

    async fn call<T, Q>(&self, name: &str, query: &Q, form: Option<&[(&str, &str)]>) -> EngineResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint(name);
        log::debug!("Upgrade service call {url}");
        let builder = match form {
            Some(form) => self.client.post(&url).query(query).form(form),
            None => self.client.get(&url).query(query),
        };
        let envelope: Envelope<T> = builder.send().await?.error_for_status()?.json().await?;
        if let Some(failures) = envelope.failures.filter(has_failures) {
            return Err(EngineError::Service {
                message: describe_failures(&failures),
            });
        }
        envelope.request.ok_or_else(|| EngineError::Service {
            message: format!("{name}: response carries no request"),
        })
    }

    async fn size(&self, url: String) -> EngineResult<u64> {
        let body: SizeBody = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.size)
    }
}

fn has_failures(failures: &serde_json::Value) -> bool {
    match failures {
        serde_json::Value::Null => false,
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn describe_failures(failures: &serde_json::Value) -> String {
    match failures {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Object(map) => map
                    .get("reason")
                    .or_else(|| map.get("message"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| item.to_string()),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl UpgradeService for HttpUpgradeService {
    async fn create(&self, request: &CreateRequest) -> EngineResult<TransferTicket> {
        #[derive(Deserialize)]
        struct Created {
            id: i64,
            key: String,
        }
        let created: Created = self.call("create", request, None).await?;
        Ok(TransferTicket {
            request_id: created.id,
            key: created.key,
        })
    }

    async fn request_transfer_access(
        &self,
        ticket: &TransferTicket,
        public_key: &str,
    ) -> EngineResult<TransferAccess> {
        self.call(
            "request_transfer_access",
            ticket,
            Some(&[("public_key", public_key)][..]),
        )
        .await
    }

    async fn uploaded_size(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
    ) -> EngineResult<u64> {
        self.size(format!("{}/upload", access.base_url(ticket))).await
    }

    async fn upload_chunk(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
        offset: u64,
        chunk: &[u8],
        signature: &str,
    ) -> EngineResult<()> {
        self.client
            .put(format!("{}/upload", access.base_url(ticket)))
            .query(&[("offset", offset)])
            .header(SIGNATURE_HEADER, signature)
            .body(chunk.to_vec())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn process(&self, ticket: &TransferTicket) -> EngineResult<()> {
        let _: serde_json::Value = self.call("process", ticket, None).await?;
        Ok(())
    }

    async fn status(&self, ticket: &TransferTicket) -> EngineResult<RequestStatus> {
        let body: StatusBody = self.call("status", ticket, None).await?;
        RequestStatus::from_state(&body.state, body.reason)
    }

    async fn result_size(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
    ) -> EngineResult<u64> {
        self.size(format!("{}/result", access.base_url(ticket))).await
    }

    async fn download_chunk(
        &self,
        ticket: &TransferTicket,
        access: &TransferAccess,
        offset: u64,
        len: usize,
        signature: &str,
    ) -> EngineResult<Vec<u8>> {
        let last = offset + len.max(1) as u64 - 1;
        let bytes = self
            .client
            .get(format!("{}/result/data", access.base_url(ticket)))
            .header(reqwest::header::RANGE, format!("bytes={offset}-{last}"))
            .header(SIGNATURE_HEADER, signature)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
