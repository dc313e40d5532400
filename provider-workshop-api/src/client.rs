//! Workshop API client
//!
//! Implements [`RemoteClient`] against the workshop backend over the host's
//! [`HttpClient`]. One request per call; retrying is the sync engine's job.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::IdentityId;
use core_library::MutationRecord;
use core_sync::{FailedRecord, PushOutcome, RemoteClient, RemoteUnit};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WorkshopApiError};
use crate::types::{ApiEnvelope, SyncRequest, SyncResponseData, UnitsPage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the workshop sync endpoints.
///
/// ```ignore
/// use provider_workshop_api::WorkshopApiClient;
///
/// let remote = WorkshopApiClient::new(http_client, "https://workshop.example.com/api");
/// let outcome = remote.push_batch(&records, credential.token()).await?;
/// ```
pub struct WorkshopApiClient {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    timeout: Duration,
}

impl WorkshopApiClient {
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self
            .http_client
            .execute(request.timeout(self.timeout))
            .await?;

        if response.is_success() {
            return Ok(response);
        }

        let body = String::from_utf8_lossy(&response.body).to_string();
        warn!(status = response.status, "Workshop API request failed");
        Err(WorkshopApiError::from_status(response.status, &body))
    }

    fn unwrap_envelope<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
        let envelope: ApiEnvelope<T> = serde_json::from_slice(&response.body)
            .map_err(|e| WorkshopApiError::ParseError(e.to_string()))?;

        if !envelope.success {
            return Err(WorkshopApiError::Rejected(
                envelope
                    .error
                    .unwrap_or_else(|| "request failed without a reason".to_string()),
            ));
        }
        envelope
            .data
            .ok_or_else(|| WorkshopApiError::ParseError("response has no data".to_string()))
    }

    async fn post_sync(&self, records: &[MutationRecord], token: &str) -> Result<PushOutcome> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint("sync"))
            .bearer_token(token)
            .header("Accept", "application/json")
            .json(&SyncRequest { items: records })?;

        let response = self.send(request).await?;
        let data: SyncResponseData = Self::unwrap_envelope(&response)?;

        let mut failed = Vec::with_capacity(data.failed.len());
        for item in data.failed {
            let submitted = item
                .record_id()
                .and_then(|id| records.iter().find(|r| r.id == id));
            match submitted {
                Some(record) => failed.push(FailedRecord {
                    record: record.clone(),
                    error_message: item.error,
                }),
                None => warn!(
                    record_id = item.record_id().unwrap_or("?"),
                    error = %item.error,
                    "Server reported a failure for a record not in the batch"
                ),
            }
        }

        Ok(PushOutcome {
            processed_count: data.processed,
            failed,
        })
    }

    async fn get_units(&self, token: &str, page_size: u32) -> Result<Vec<RemoteUnit>> {
        let request = HttpRequest::new(HttpMethod::Get, self.endpoint("units"))
            .query("scope", "user")
            .query("limit", page_size)
            .bearer_token(token)
            .header("Accept", "application/json");

        let response = self.send(request).await?;
        let page: UnitsPage = Self::unwrap_envelope(&response)?;

        if page.has_more {
            debug!(
                next_token = page.next_token.as_deref().unwrap_or(""),
                "More units available; only the first page is merged"
            );
        }
        Ok(page.units)
    }
}

#[async_trait]
impl RemoteClient for WorkshopApiClient {
    #[instrument(skip(self, records, token), fields(records = records.len()))]
    async fn push_batch(
        &self,
        records: &[MutationRecord],
        token: &str,
    ) -> core_sync::Result<PushOutcome> {
        if records.is_empty() {
            return Ok(PushOutcome::default());
        }

        let outcome = self.post_sync(records, token).await?;
        info!(
            processed = outcome.processed_count,
            failed = outcome.failed.len(),
            "Batch pushed"
        );
        Ok(outcome)
    }

    #[instrument(skip(self, token), fields(owner = %owner))]
    async fn pull_units(
        &self,
        token: &str,
        owner: &IdentityId,
        page_size: u32,
    ) -> core_sync::Result<Vec<RemoteUnit>> {
        let units = self.get_units(token, page_size).await?;
        info!(units = units.len(), "Units pulled");
        Ok(units)
    }
}
