//! Workshop API wire types
//!
//! Every endpoint wraps its payload in the same envelope:
//! `{ "success": bool, "data": ..., "error": "..." }`.

use core_library::MutationRecord;
use core_sync::RemoteUnit;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /sync` request body
#[derive(Debug, Serialize)]
pub struct SyncRequest<'a> {
    pub items: &'a [MutationRecord],
}

/// `POST /sync` response data
#[derive(Debug, Default, Deserialize)]
pub struct SyncResponseData {
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub failed: Vec<FailedItem>,
}

/// A record the server declined. `item` echoes the submitted record.
#[derive(Debug, Deserialize)]
pub struct FailedItem {
    pub item: Value,
    #[serde(default)]
    pub error: String,
}

impl FailedItem {
    pub fn record_id(&self) -> Option<&str> {
        self.item.get("id").and_then(Value::as_str)
    }
}

/// `GET /units` response data
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitsPage {
    #[serde(default)]
    pub units: Vec<RemoteUnit>,
    pub next_token: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}
