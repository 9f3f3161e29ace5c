//! Error types for the calmirror ecosystem.

use thiserror::Error;

/// Errors that can occur while mirroring records.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Malformed timestamp '{0}': expected YYYY-MM-DD or an offset-suffixed instant")]
    MalformedTimestamp(String),

    #[error("Sync cursor no longer accepted by the source; a full listing is required")]
    CursorExpired,

    #[error("{count} sink records share external id '{external_id}'")]
    AmbiguousMatch { external_id: String, count: usize },

    #[error("Transient sink failure: {0}")]
    TransientWrite(String),

    #[error("Sink rejected the write: {0}")]
    PermanentWrite(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Authorization error: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MirrorError {
    /// Whether retrying the same call could possibly succeed.
    ///
    /// Only transient sink failures qualify; everything else is either a
    /// deterministic rejection or a cycle-level condition.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::TransientWrite(_))
    }
}

/// Result type alias for mirror operations.
pub type MirrorResult<T> = Result<T, MirrorError>;
