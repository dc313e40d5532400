//! # Sync Module
//!
//! Keeps the local workshop store and the server in step.
//!
//! ## Overview
//!
//! Every local edit lands in the durable mutation queue. The
//! [`SyncEngine`] drains that queue to the server in batches, then pulls
//! the user's units back and merges them with last-writer-wins. Round-trips
//! are started by a debounce after edits, a periodic backstop, a backoff
//! retry after failures, reconnection, login, or an explicit request.
//!
//! ## Components
//!
//! - [`engine`]: round-trip orchestration, timers and the re-entrancy guard
//! - [`push`]: batched queue drain with the retry ceiling
//! - [`merge`]: timestamp normalization and last-writer-wins merge
//! - [`status`]: the status record and its subscribers
//! - [`remote`]: the server contract; [`memory_remote`] is a loopback
//!   implementation
//! - [`backoff`] and [`config`]: timing and limits

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory_remote;
pub mod merge;
pub mod push;
pub mod remote;
pub mod status;

pub use backoff::BackoffPolicy;
pub use config::SyncConfig;
pub use engine::{
    LoginSync, RoundTripOutcome, RoundTripReport, SkipReason, SyncDeps, SyncEngine, SyncPhase,
    SyncTrigger,
};
pub use error::{Result, SyncError};
pub use memory_remote::InMemoryRemote;
pub use merge::{merge_pulled, normalize_remote_unit, MergeSummary};
pub use push::{drain_queue, PushSummary};
pub use remote::{FailedRecord, PushOutcome, RemoteClient, RemoteUnit};
pub use status::{StatusCategory, StatusChannel, Subscription, SyncStatus};
