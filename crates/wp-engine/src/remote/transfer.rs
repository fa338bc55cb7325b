//! Retrying, resumable chunked transfers.
//!
//! Only the snapshot upload and download are retried. Each attempt asks the
//! service how far the previous attempt got and continues from that offset.

use crate::error::{EngineError, EngineResult};
use crate::remote::service::{TransferAccess, TransferTicket, UpgradeService};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use wp_core::TransferConfig;

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is exhausted.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(EngineError::Transfer {
                    what: what.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay(attempt);
                log::warn!(
                    "{what} attempt {attempt}/{} failed: {e}; retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// A transfer bound to one request and its access grant.
pub struct Transfer<'a, S: UpgradeService + ?Sized> {
    pub service: &'a S,
    pub ticket: &'a TransferTicket,
    pub access: &'a TransferAccess,
    pub policy: &'a RetryPolicy,
    pub chunk_size: usize,
}

impl<S: UpgradeService + ?Sized> Transfer<'_, S> {
    /// Upload `source`, resuming from what the service already holds.
    pub async fn upload(&self, source: &Path, sign: &(dyn Fn(&[u8]) -> String + Sync)) -> EngineResult<u64> {
        let data = tokio::fs::read(source).await?;
        let data = data.as_slice();
        let total = data.len() as u64;

        with_backoff(self.policy, "upload", |attempt| async move {
            let mut offset = self
                .service
                .uploaded_size(self.ticket, self.access)
                .await?
                .min(total);
            log::info!("Upload from offset {offset} (attempt {attempt})");
            while offset < total {
                let end = (offset + self.chunk_size as u64).min(total);
                let chunk = &data[offset as usize..end as usize];
                self.service
                    .upload_chunk(self.ticket, self.access, offset, chunk, &sign(chunk))
                    .await?;
                offset = end;
            }
            Ok(total)
        })
        .await
    }

    /// Download the result into `dest`, appending to a partial file.
    pub async fn download(&self, dest: &Path, sign: &(dyn Fn(&[u8]) -> String + Sync)) -> EngineResult<u64> {
        with_backoff(self.policy, "download", |attempt| async move {
            let total = self.service.result_size(self.ticket, self.access).await?;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dest)
                .await?;
            let mut offset = file.metadata().await?.len();
            log::info!("Download from offset {offset} of {total} (attempt {attempt})");
            while offset < total {
                let len = (total - offset).min(self.chunk_size as u64) as usize;
                let marker = format!("{}:{offset}", self.ticket.request_id);
                let bytes = self
                    .service
                    .download_chunk(self.ticket, self.access, offset, len, &sign(marker.as_bytes()))
                    .await?;
                if bytes.is_empty() {
                    return Err(EngineError::Service {
                        message: format!("empty chunk at offset {offset}"),
                    });
                }
                file.write_all(&bytes).await?;
                offset += bytes.len() as u64;
            }
            file.flush().await?;
            Ok(total)
        })
        .await
    }
}

#[cfg(test)]
#[path = "transfer_test.rs"]
mod tests;
