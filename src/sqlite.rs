// SQLite-backed blob storage

use crate::blob::BlobStorage;
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::debug;

/// Blobs kept as rows of a single key-value table
pub struct SqliteBlobStorage {
    db: Connection,
}

impl SqliteBlobStorage {
    /// Open or create a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let storage = Self { db };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Get a reference to the SQLite database connection
    pub fn db(&self) -> &Connection {
        &self.db
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating blob schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

impl BlobStorage for SqliteBlobStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let blob = self
            .db
            .query_row("SELECT value FROM blobs WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .context("Failed to read blob row")?;

        Ok(blob)
    }

    fn set(&mut self, key: &str, blob: &str) -> Result<()> {
        self.db
            .execute(
                "INSERT OR REPLACE INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, blob, now_ms()],
            )
            .context("Failed to write blob row")?;

        debug!(key, bytes = blob.len(), "Wrote blob row");
        Ok(())
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
