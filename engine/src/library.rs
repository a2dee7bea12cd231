//! User actions on history entries: open the downloaded file, or forget the
//! entry and (optionally) the file with it.

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::database::{Database, HistoryEntry};
use crate::utils::os::open_with_default_app;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("no history entry with id {0}")]
    NotFound(i64),
    #[error("file not found: {0}")]
    FileMissing(String),
    #[error("history database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to open file: {0}")]
    Open(#[from] std::io::Error),
}

/// What happened to the file on disk when its entry was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum FileRemoval {
    Removed,
    /// Nothing was on disk at that path.
    Missing,
    /// The caller asked to keep the file.
    Kept,
    /// The row is gone but the file could not be deleted.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovalReport {
    pub entry: HistoryEntry,
    pub file: FileRemoval,
}

/// Open the entry's file with the desktop's default application.
pub fn open_entry(db: &Database, id: i64) -> Result<HistoryEntry, LibraryError> {
    let entry = db.find_entry(id)?.ok_or(LibraryError::NotFound(id))?;
    let path = Path::new(&entry.filepath);
    if !path.is_file() {
        return Err(LibraryError::FileMissing(entry.filepath));
    }
    open_with_default_app(path)?;
    tracing::info!("opened {}", entry.filepath);
    Ok(entry)
}

/// Remove the ledger row first, then best-effort the file. A file that can't
/// be deleted is reported, never rolled back into the ledger.
pub fn remove_entry(db: &Database, id: i64, delete_file: bool) -> Result<RemovalReport, LibraryError> {
    let entry = db.find_entry(id)?.ok_or(LibraryError::NotFound(id))?;
    db.delete_entry(id)?;

    let file = if !delete_file {
        FileRemoval::Kept
    } else {
        match fs::remove_file(&entry.filepath) {
            Ok(()) => FileRemoval::Removed,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileRemoval::Missing,
            Err(e) => {
                tracing::warn!("could not delete {}: {e}", entry.filepath);
                FileRemoval::Failed(e.to_string())
            }
        }
    };
    tracing::info!("removed history entry #{id} ({:?})", file);
    Ok(RemovalReport { entry, file })
}
