//! The sink side of the mirror: the record store being kept consistent.

use async_trait::async_trait;

use crate::error::MirrorResult;
use crate::record::{CanonicalRecord, Materialization, SinkRecord};

/// Outcome of an external-id lookup.
///
/// More than one match violates the join-key uniqueness invariant; the
/// match count comes back for the operator report instead of a guessed
/// record.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    NotFound,
    Found(SinkRecord),
    Ambiguous(usize),
}

/// A record store addressed by sink id and searchable by external id.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Find the record carrying `external_id`, if any.
    async fn find_by_external_id(&self, external_id: &str) -> MirrorResult<Lookup>;

    /// Insert a new record and return its sink-side identity.
    async fn create(&self, record: &CanonicalRecord) -> MirrorResult<Materialization>;

    /// Overwrite the content fields of the record at `sink_id`. The join
    /// key is never rewritten.
    async fn update(&self, sink_id: &str, record: &CanonicalRecord) -> MirrorResult<()>;
}
