//! The source side of the mirror: where canonical records come from.

use async_trait::async_trait;

use crate::cursor::SyncCursor;
use crate::error::MirrorResult;
use crate::record::CanonicalRecord;

/// One complete fetch: every page of changes since the cursor, already
/// normalized.
#[derive(Debug)]
pub struct ChangeBatch {
    pub records: Vec<CanonicalRecord>,
    /// The cursor to persist once every record reaches a terminal outcome.
    pub next_cursor: SyncCursor,
    /// Raw items discarded before reconciliation (no title, unusable
    /// timestamps).
    pub dropped: usize,
}

/// A calendar-like system that can list changes since a cursor.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch all changes since `cursor`, following continuation tokens
    /// until exhausted so the batch is complete and self-consistent.
    /// `None` requests a full listing.
    ///
    /// Returns [`MirrorError::CursorExpired`] when the source refuses the
    /// cursor; callers fall back to a full listing rather than treating
    /// that as "no changes".
    ///
    /// [`MirrorError::CursorExpired`]: crate::error::MirrorError::CursorExpired
    async fn fetch_changes(&self, cursor: Option<&SyncCursor>) -> MirrorResult<ChangeBatch>;
}
