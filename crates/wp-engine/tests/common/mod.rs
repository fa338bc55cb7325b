//! In-memory upgrade service shared by the remote integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use wp_core::{RemoteConfig, TransferConfig};
use wp_db::{export_snapshot, lock_ident, LockHandle, LockSettings, TargetDb};
use wp_engine::remote::service::{CreateRequest, TransferAccess, TransferTicket};
use wp_engine::{EngineError, EngineResult, RequestStatus, RetryPolicy, UpgradeService};

#[derive(Debug, Default)]
pub struct ServiceState {
    pub created: Vec<CreateRequest>,
    pub registered_keys: Vec<String>,
    pub uploaded: Vec<u8>,
    pub chunk_signatures: Vec<String>,
    pub processing: bool,
    /// Answers to `status`, `Pending` once exhausted
    pub statuses: VecDeque<RequestStatus>,
    pub result: Vec<u8>,
    /// Upload chunk calls left to fail
    pub failing_uploads: u32,
    pub reject_create: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeService {
    pub state: Mutex<ServiceState>,
}

impl FakeService {
    pub fn with<T>(&self, f: impl FnOnce(&mut ServiceState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn reset() -> EngineError {
        EngineError::Service {
            message: "connection reset by peer".to_string(),
        }
    }
}

#[async_trait]
impl UpgradeService for FakeService {
    async fn create(&self, request: &CreateRequest) -> EngineResult<TransferTicket> {
        self.with(|s| {
            if let Some(reason) = &s.reject_create {
                return Err(EngineError::Service {
                    message: reason.clone(),
                });
            }
            s.created.push(request.clone());
            Ok(TransferTicket {
                request_id: 1000 + s.created.len() as i64,
                key: format!("key-{}", s.created.len()),
            })
        })
    }

    async fn request_transfer_access(
        &self,
        ticket: &TransferTicket,
        public_key: &str,
    ) -> EngineResult<TransferAccess> {
        self.with(|s| s.registered_keys.push(public_key.to_string()));
        Ok(TransferAccess {
            hostname: "transfer.test".to_string(),
            port: 2222,
            user: format!("u{}", ticket.request_id),
        })
    }

    async fn uploaded_size(
        &self,
        _ticket: &TransferTicket,
        _access: &TransferAccess,
    ) -> EngineResult<u64> {
        Ok(self.with(|s| s.uploaded.len() as u64))
    }

    async fn upload_chunk(
        &self,
        _ticket: &TransferTicket,
        _access: &TransferAccess,
        offset: u64,
        chunk: &[u8],
        signature: &str,
    ) -> EngineResult<()> {
        self.with(|s| {
            if s.failing_uploads > 0 {
                s.failing_uploads -= 1;
                return Err(Self::reset());
            }
            assert_eq!(s.uploaded.len() as u64, offset);
            s.uploaded.extend_from_slice(chunk);
            s.chunk_signatures.push(signature.to_string());
            Ok(())
        })
    }

    async fn process(&self, _ticket: &TransferTicket) -> EngineResult<()> {
        self.with(|s| {
            if s.uploaded.is_empty() {
                return Err(EngineError::Service {
                    message: "no database uploaded".to_string(),
                });
            }
            s.processing = true;
            Ok(())
        })
    }

    async fn status(&self, _ticket: &TransferTicket) -> EngineResult<RequestStatus> {
        Ok(self.with(|s| s.statuses.pop_front().unwrap_or(RequestStatus::Pending)))
    }

    async fn result_size(
        &self,
        _ticket: &TransferTicket,
        _access: &TransferAccess,
    ) -> EngineResult<u64> {
        Ok(self.with(|s| s.result.len() as u64))
    }

    async fn download_chunk(
        &self,
        _ticket: &TransferTicket,
        _access: &TransferAccess,
        offset: u64,
        len: usize,
        _signature: &str,
    ) -> EngineResult<Vec<u8>> {
        Ok(self.with(|s| {
            let start = offset as usize;
            let end = (start + len).min(s.result.len());
            s.result[start..end].to_vec()
        }))
    }
}

pub fn remote_config() -> RemoteConfig {
    RemoteConfig {
        contract: Some("M-TEST-CONTRACT".to_string()),
        email: Some("ops@example.com".to_string()),
        transfer: TransferConfig {
            chunk_size: 4096,
            ..TransferConfig::default()
        },
        ..RemoteConfig::default()
    }
}

pub fn quick_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub async fn lock(db: &TargetDb) -> LockHandle {
    LockHandle::acquire(
        db,
        LockSettings {
            ident: lock_ident("remote-test"),
            heartbeat_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            stale_after: Duration::from_secs(60),
        },
    )
    .await
    .unwrap()
}

/// Play the service: open the uploaded bytes, let `upgrade` change the
/// database, and return the exported result.
pub fn upgrade_uploaded(
    workdir: &Path,
    uploaded: &[u8],
    upgrade: impl FnOnce(&TargetDb),
) -> Vec<u8> {
    let received = workdir.join("received.duckdb");
    std::fs::write(&received, uploaded).unwrap();
    let result = workdir.join("result.duckdb");
    {
        let db = TargetDb::open(&received).unwrap();
        upgrade(&db);
        export_snapshot(&db, &result).unwrap();
    }
    std::fs::read(result).unwrap()
}
