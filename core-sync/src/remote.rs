//! Contract between the engine and the workshop server.

use crate::error::Result;
use async_trait::async_trait;
use core_auth::IdentityId;
use core_library::MutationRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record the server declined, with its reason.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRecord {
    pub record: MutationRecord,
    pub error_message: String,
}

/// Per-record result of one batch. Records not listed in `failed` were
/// applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOutcome {
    pub processed_count: usize,
    pub failed: Vec<FailedRecord>,
}

/// A unit as delivered by the pull endpoint.
///
/// Timestamps are still in wire form; see
/// [`normalize_remote_unit`](crate::merge::normalize_remote_unit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteUnit(pub Value);

impl RemoteUnit {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Apply a batch of queued mutations.
    ///
    /// # Errors
    ///
    /// Only transport-level failures (no response, non-success status,
    /// unreadable body) are errors. Records the server rejects come back in
    /// [`PushOutcome::failed`].
    async fn push_batch(&self, records: &[MutationRecord], token: &str) -> Result<PushOutcome>;

    /// Units owned by `owner`, first page only.
    async fn pull_units(
        &self,
        token: &str,
        owner: &IdentityId,
        page_size: u32,
    ) -> Result<Vec<RemoteUnit>>;
}
