//! # Pull Merge
//!
//! Folds the server's units into the local store with last-writer-wins on
//! `updatedAt`, ties going to the local copy. The comparison is per unit:
//! a strictly newer server unit replaces the local one wholesale, steps
//! and photos included.
//!
//! Merged writes go through [`EntityStore::upsert_unit`] and never enqueue
//! a mutation, so a pull cannot cause a push.

use crate::error::{Result, SyncError};
use crate::remote::RemoteUnit;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use core_library::{EntityStore, SyncState, Unit};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Keys holding timestamps anywhere in a unit document.
const TIMESTAMP_FIELDS: &[&str] = &["createdAt", "updatedAt", "lastSyncAt", "timestamp"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub inserted: usize,
    pub overwritten: usize,
    pub kept_local: usize,
    /// Units that could not be decoded or written.
    pub skipped: usize,
}

/// Turn a wire unit into a local [`Unit`] tagged `synced`.
///
/// Every timestamp field, at any depth, is accepted as RFC 3339 (any
/// offset), as a naive `YYYY-MM-DDTHH:MM:SS[.fff]` taken as UTC, or as
/// epoch milliseconds.
pub fn normalize_remote_unit(remote: RemoteUnit) -> Result<Unit> {
    let mut document = remote.0;
    normalize_timestamps(&mut document)?;

    let mut unit: Unit = serde_json::from_value(document)
        .map_err(|e| SyncError::InvalidPayload(format!("unit: {}", e)))?;
    unit.sync_state = SyncState::Synced;
    Ok(unit)
}

fn normalize_timestamps(value: &mut Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if TIMESTAMP_FIELDS.contains(&key.as_str()) {
                    if let Some(parsed) = parse_timestamp(key, field)? {
                        *field = Value::String(
                            parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                        );
                    }
                } else {
                    normalize_timestamps(field)?;
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_timestamps(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_timestamp(field: &str, value: &Value) -> Result<Option<DateTime<Utc>>> {
    let invalid = || SyncError::InvalidTimestamp {
        field: field.to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(None),
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc())
            })
            .map(Some)
            .map_err(|_| invalid()),
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Some)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Merge pulled units into the local store.
pub async fn merge_pulled<S>(store: &S, remote_units: Vec<RemoteUnit>) -> Result<MergeSummary>
where
    S: EntityStore + ?Sized,
{
    let mut summary = MergeSummary::default();

    for remote in remote_units {
        let remote_id = remote.id().unwrap_or("?").to_string();
        let incoming = match normalize_remote_unit(remote) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(unit_id = %remote_id, error = %e, "Skipping undecodable pulled unit");
                summary.skipped += 1;
                continue;
            }
        };

        let local = store.get_unit(&incoming.id).await?;
        if let Some(local) = &local {
            if incoming.updated_at <= local.updated_at {
                summary.kept_local += 1;
                continue;
            }
            debug!(
                unit_id = %incoming.id,
                local_updated_at = %local.updated_at,
                remote_updated_at = %incoming.updated_at,
                "Server copy is newer, replacing local"
            );
        }

        // One unit the local store refuses must not hold back the rest.
        if let Err(e) = store.upsert_unit(&incoming).await {
            warn!(unit_id = %incoming.id, error = %e, "Skipping pulled unit the store rejected");
            summary.skipped += 1;
            continue;
        }
        if local.is_some() {
            summary.overwritten += 1;
        } else {
            summary.inserted += 1;
        }
    }

    info!(
        inserted = summary.inserted,
        overwritten = summary.overwritten,
        kept_local = summary.kept_local,
        skipped = summary.skipped,
        "Pull merged"
    );
    Ok(summary)
}
