use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::os::app_support_dir;

/// Ledger timestamps are stored as text in this layout so they sort lexically.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ledger of completed downloads.
pub struct Database {
    conn: Connection,
}

/* --------------------------------- models --------------------------------- */

/// One completed download. Rows are never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub title: String,
    pub filepath: String,
    pub url: String,
    pub date: String,
}

/* -------------------------------- database -------------------------------- */
impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    /// Open the ledger at the per-user default location.
    pub fn open_default() -> Result<Self> {
        let db_path = Self::default_db_path()?;
        Self::open(&db_path)
    }

    /// Throwaway ledger, handy for previews and tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database { conn: Connection::open_in_memory()? };
        db.create_tables()?;
        Ok(db)
    }

    pub fn default_db_path() -> Result<PathBuf> {
        let app_config_dir = app_support_dir();
        std::fs::create_dir_all(&app_config_dir).map_err(|e| {
            rusqlite::Error::InvalidPath(PathBuf::from(format!(
                "{}: {e}",
                app_config_dir.display()
            )))
        })?;

        Ok(app_config_dir.join("history.db"))
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                filepath TEXT NOT NULL,
                url TEXT NOT NULL,
                date TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /* ----------------------------- write helpers ----------------------------- */

    /// Record a completed download. Id and timestamp come from the ledger itself.
    pub fn add_entry(&self, title: &str, filepath: &str, url: &str) -> Result<i64> {
        self.insert_at(title, filepath, url, Local::now())
    }

    fn insert_at(&self, title: &str, filepath: &str, url: &str, at: DateTime<Local>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO downloads (title, filepath, url, date) VALUES (?1, ?2, ?3, ?4)",
            params![title, filepath, url, at.format(DATE_FORMAT).to_string()],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!("history: added #{id} {title}");
        Ok(id)
    }

    /// Remove a row by id. Returns how many rows went away; an unknown id is `Ok(0)`.
    pub fn delete_entry(&self, id: i64) -> Result<usize> {
        let n = self.conn.execute("DELETE FROM downloads WHERE id=?1", [id])?;
        Ok(n)
    }

    /* ------------------------------ read helpers ----------------------------- */

    /// All entries, newest first. Rows written within the same second keep
    /// insertion order (latest first).
    pub fn list_entries(&self) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, filepath, url, date
               FROM downloads
              ORDER BY date DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn find_entry(&self, id: i64) -> Result<Option<HistoryEntry>> {
        self.conn
            .query_row(
                "SELECT id, title, filepath, url, date FROM downloads WHERE id=?1",
                [id],
                row_to_entry,
            )
            .optional()
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        filepath: row.get(2)?,
        url: row.get(3)?,
        date: row.get(4)?,
    })
}
