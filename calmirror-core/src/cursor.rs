//! The resumable sync cursor: the only durable state the engine owns.
//!
//! One opaque token bounds each incremental fetch to "changes since the
//! last cycle". The store persists it atomically and exactly once per
//! successful cycle; page continuation inside a cycle is tracked in memory
//! by [`FetchPosition`] and never written to disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MirrorResult;

/// Opaque resumption token issued by the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        SyncCursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Filesystem-backed cursor persistence.
///
/// The path is injected by the caller; the engine never derives it from
/// ambient state.
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CursorStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last persisted cursor, or `None` on first run.
    ///
    /// A missing file and a blank file both mean "no cursor".
    pub fn load(&self) -> MirrorResult<Option<SyncCursor>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let token = content.trim();
        if token.is_empty() {
            return Ok(None);
        }

        Ok(Some(SyncCursor::new(token)))
    }

    /// Persist the cursor atomically: write a temp file, then rename it
    /// over the old one. A crash between the two steps leaves either the
    /// previous token or the new one on disk, never a torn write.
    pub fn save(&self, cursor: &SyncCursor) -> MirrorResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        std::fs::write(&temp, cursor.as_str())?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    /// Forget the cursor; the next cycle performs a full listing.
    pub fn clear(&self) -> MirrorResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory pagination state for one fetch cycle.
///
/// Advancing to the next page is pure: the cursor the cycle started from
/// is carried along unchanged, and nothing here touches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPosition {
    pub cursor: Option<SyncCursor>,
    pub page_token: Option<String>,
}

impl FetchPosition {
    /// Position for the first page of a cycle.
    pub fn start(cursor: Option<SyncCursor>) -> Self {
        FetchPosition {
            cursor,
            page_token: None,
        }
    }

    /// Position for the next page of the same cycle.
    pub fn advance_page(&self, token: impl Into<String>) -> Self {
        FetchPosition {
            cursor: self.cursor.clone(),
            page_token: Some(token.into()),
        }
    }
}
