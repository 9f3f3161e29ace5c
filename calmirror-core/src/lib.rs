//! Core reconciliation engine for the calmirror ecosystem.
//!
//! This crate holds the provider-neutral half of the mirror:
//! - `record`: the canonical record model and its content equality predicate
//! - `normalize`: datetime normalization (all-day vs. timed events)
//! - `cursor`: the resumable sync cursor (load, advance, persist)
//! - `source` / `sink`: the contracts connectors implement
//! - `retry`: bounded backoff for per-record sink calls
//! - `reconcile`: the create/update/skip engine
//!
//! Network connectors, configuration and the CLI live in the binary crate.

pub mod cursor;
pub mod error;
pub mod normalize;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod sink;
pub mod source;

// Re-export the working set at crate root for convenience
pub use cursor::{CursorStore, FetchPosition, SyncCursor};
pub use error::{MirrorError, MirrorResult};
pub use normalize::normalize_interval;
pub use reconcile::{CycleReport, FailureReport, Reconciler, RecordOutcome};
pub use record::{CanonicalRecord, Interval, Materialization, SinkRecord};
pub use retry::{with_retry, RetryPolicy};
pub use sink::{Lookup, RecordSink};
pub use source::{ChangeBatch, EventSource};
