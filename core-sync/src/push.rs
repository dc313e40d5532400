//! # Queue Drain
//!
//! Pushes a snapshot of the mutation queue to the server in fixed-size
//! batches, in enqueue order.
//!
//! - A batch whose request fails fails every record in it.
//! - Acknowledged records leave the queue; unit creates and updates flip
//!   the local copy to `synced`.
//! - Failed records get `retry_count + 1` and are dropped once they reach
//!   the ceiling.

use crate::config::SyncConfig;
use crate::error::Result;
use crate::remote::RemoteClient;
use core_library::{EntityType, LocalStore, MutationAction, MutationRecord, SyncState};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Result of draining the queue once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushSummary {
    /// Queue length when the drain started.
    pub queued: usize,
    pub batches: usize,
    pub acknowledged: usize,
    /// Records that failed this round, including the exhausted ones.
    pub failed: usize,
    /// Records dropped at the retry ceiling.
    pub exhausted: Vec<MutationRecord>,
}

impl PushSummary {
    /// Queue entries left from the starting snapshot.
    pub fn remaining(&self) -> usize {
        self.queued
            .saturating_sub(self.acknowledged + self.exhausted.len())
    }
}

#[instrument(skip_all, fields(batch_size = config.batch_size))]
pub async fn drain_queue(
    store: &dyn LocalStore,
    remote: &dyn RemoteClient,
    token: &str,
    config: &SyncConfig,
) -> Result<PushSummary> {
    let queue = store.pending().await?;
    let mut summary = PushSummary {
        queued: queue.len(),
        ..Default::default()
    };

    if queue.is_empty() {
        debug!("Mutation queue empty, nothing to push");
        return Ok(summary);
    }

    for (index, batch) in queue.chunks(config.batch_size.max(1)).enumerate() {
        summary.batches += 1;

        let failures: HashMap<&str, String> = match remote.push_batch(batch, token).await {
            Ok(outcome) => outcome
                .failed
                .into_iter()
                .filter_map(|failure| {
                    batch
                        .iter()
                        .find(|r| r.id == failure.record.id)
                        .map(|r| (r.id.as_str(), failure.error_message))
                })
                .collect(),
            Err(e) => {
                warn!(batch = index, records = batch.len(), error = %e, "Batch push failed");
                batch
                    .iter()
                    .map(|r| (r.id.as_str(), e.to_string()))
                    .collect()
            }
        };

        for record in batch {
            match failures.get(record.id.as_str()) {
                None => {
                    acknowledge(store, record).await?;
                    summary.acknowledged += 1;
                }
                Some(message) => {
                    summary.failed += 1;
                    if let Some(dropped) =
                        record_failure(store, record, message, config.max_retry_count).await?
                    {
                        summary.exhausted.push(dropped);
                    }
                }
            }
        }
    }

    info!(
        queued = summary.queued,
        batches = summary.batches,
        acknowledged = summary.acknowledged,
        failed = summary.failed,
        exhausted = summary.exhausted.len(),
        "Queue drain finished"
    );
    Ok(summary)
}

async fn acknowledge(store: &dyn LocalStore, record: &MutationRecord) -> Result<()> {
    store.remove_record(&record.id).await?;

    let flips_entity = record.entity_type == EntityType::Unit
        && matches!(
            record.action,
            MutationAction::Create | MutationAction::Update
        );
    if let (true, Some(unit_id)) = (flips_entity, record.entity_id()) {
        store.set_sync_state(unit_id, SyncState::Synced).await?;
    }
    Ok(())
}

/// Bump the retry count, or drop the record at the ceiling.
async fn record_failure(
    store: &dyn LocalStore,
    record: &MutationRecord,
    message: &str,
    max_retry_count: u32,
) -> Result<Option<MutationRecord>> {
    let mut retried = record.clone();
    retried.retry_count = record.retry_count.saturating_add(1);

    if retried.retry_count >= max_retry_count {
        warn!(
            record_id = %record.id,
            entity_id = record.entity_id().unwrap_or("?"),
            retry_count = retried.retry_count,
            error = %message,
            "Retry ceiling reached, dropping queued mutation"
        );
        store.remove_record(&record.id).await?;
        return Ok(Some(retried));
    }

    warn!(
        record_id = %record.id,
        retry_count = retried.retry_count,
        error = %message,
        "Queued mutation failed"
    );
    store.update_record(&retried).await?;
    Ok(None)
}
