//! HTTP sync client for the progress sync server.
//!
//! A sync pushes the owner's local rows, pulls the server's merged view and
//! merges that back into the local store with the same monotonic rules the
//! server uses.

use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::db::{ApplyReport, ProgressRepository, StoreError};
use crate::models::ProgressSlice;
use crate::validate::RowRejection;

/// Errors that can occur during sync client operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync not configured. Add server_url and api_token to config.")]
    NotConfigured,
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Unauthorized: the server rejected the sync credential")]
    Unauthorized,
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Server storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Unexpected server response: {0}")]
    Protocol(String),
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

/// Server acknowledgement of a push.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushAck {
    pub success: bool,
    #[serde(default)]
    pub rejected: Vec<RowRejection>,
}

/// Result of a full push/pull/merge cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Rows sent to the server.
    pub pushed: usize,
    /// Rows the server refused.
    pub rejected: Vec<RowRejection>,
    /// Rows received from the server.
    pub pulled: usize,
    /// Outcome of writing the pulled rows locally.
    pub applied: ApplyReport,
    pub cancelled: bool,
}

/// Sync client for one server and credential.
#[derive(Debug, Clone)]
pub struct SyncClient {
    server_url: String,
    token: String,
    http: reqwest::Client,
}

impl SyncClient {
    /// Creates a new sync client from config.
    ///
    /// Returns an error if sync is not configured.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or(SyncError::NotConfigured)?;
        let token = config.api_token.clone().ok_or(SyncError::NotConfigured)?;
        Self::new(server_url, token, Duration::from_secs(config.timeout_secs))
    }

    pub fn new(server_url: String, token: String, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Protocol(e.to_string()))?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            token,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Checks the public health endpoint.
    pub async fn health(&self) -> Result<(), SyncError> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;
        Ok(())
    }

    /// Sends a slice to the server for merging.
    pub async fn push(&self, slice: &ProgressSlice) -> Result<PushAck, SyncError> {
        let response = self
            .http
            .post(self.url("/progress/sync"))
            .bearer_auth(&self.token)
            .json(slice)
            .send()
            .await
            .map_err(network_error)?;

        let ack: PushAck = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(e.to_string()))?;
        if !ack.success {
            return Err(SyncError::Protocol("server did not confirm the merge".to_string()));
        }
        Ok(ack)
    }

    /// Fetches the server's merged view for the credential's owner.
    pub async fn pull(&self) -> Result<ProgressSlice, SyncError> {
        let response = self
            .http
            .get(self.url("/progress"))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(network_error)?;

        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(e.to_string()))
    }

    /// Push local rows, pull the merged view, merge it back locally.
    ///
    /// Cancellation is checked between the steps and between written rows;
    /// a cancelled sync returns the partial report.
    pub async fn sync(
        &self,
        repo: &ProgressRepository,
        owner: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        let local = repo.load_slice(owner).await?;
        if !local.is_empty() {
            let ack = self.push(&local).await?;
            report.pushed = local.row_count();
            report.rejected = ack.rejected;
            if !report.rejected.is_empty() {
                tracing::warn!("Server rejected {} row(s)", report.rejected.len());
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let remote = self.pull().await?;
        report.pulled = remote.row_count();

        report.applied = repo.apply_slice(owner, &remote, cancel).await?;
        report.cancelled = report.applied.cancelled;

        tracing::info!(
            "Synced {}: pushed {}, pulled {}, applied {}",
            owner,
            report.pushed,
            report.pulled,
            report.applied.applied
        );

        Ok(report)
    }
}

fn network_error(e: reqwest::Error) -> SyncError {
    SyncError::NetworkUnavailable(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => SyncError::Unauthorized,
        400 | 422 => SyncError::ValidationError(body),
        s if s >= 500 => SyncError::StorageUnavailable(body),
        _ => SyncError::Protocol(format!("HTTP {}: {}", status, body)),
    })
}
