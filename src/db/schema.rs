use super::pages::ThumbnailOptions;
use crate::error::{AppError, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Database wrapper for thread-safe access.
///
/// SQLite serializes writers, so the store keeps a single connection and
/// every caller goes through its mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    pub(super) thumbnails: ThumbnailOptions,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            thumbnails: ThumbnailOptions::default(),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Use different thumbnail settings.
    pub fn with_thumbnail_options(mut self, options: ThumbnailOptions) -> Self {
        self.thumbnails = options;
        self
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Users table
            CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                pass TEXT NOT NULL
            );

            -- Series table
            CREATE TABLE IF NOT EXISTS series (
                sid TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author TEXT,
                mod_time INTEGER NOT NULL,
                position INTEGER NOT NULL,
                missing INTEGER NOT NULL DEFAULT 0
            );

            -- Entries table
            CREATE TABLE IF NOT EXISTS entries (
                sid TEXT NOT NULL,
                eid TEXT NOT NULL,
                title TEXT NOT NULL,
                archive TEXT NOT NULL,
                mod_time INTEGER NOT NULL,
                filesize INTEGER NOT NULL,
                pages TEXT NOT NULL,
                position INTEGER NOT NULL,
                missing INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (sid, eid),
                FOREIGN KEY (sid) REFERENCES series(sid) ON DELETE CASCADE
            );

            -- Thumbnail cache (derived data, safe to drop)
            CREATE TABLE IF NOT EXISTS thumbnails (
                sid TEXT NOT NULL,
                eid TEXT NOT NULL,
                data BLOB NOT NULL,
                mod_time INTEGER NOT NULL,
                PRIMARY KEY (sid, eid),
                FOREIGN KEY (sid, eid) REFERENCES entries(sid, eid) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_series_position ON series(position);
            CREATE INDEX IF NOT EXISTS idx_entries_position ON entries(sid, position);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Reclaim free pages of the database file.
    pub fn compact(&self) -> Result<()> {
        let start = std::time::Instant::now();
        let conn = self.conn.lock();
        conn.execute_batch("VACUUM")
            .map_err(|e| AppError::Internal(format!("Failed to compact database: {}", e)))?;
        tracing::info!(elapsed = ?start.elapsed(), "Database compacted");
        Ok(())
    }

    /// Human-readable dump of every table. Binary columns are shown as
    /// their length.
    pub fn dump(&self) -> Result<String> {
        let conn = self.conn.lock();
        let mut out = String::new();

        let _ = writeln!(out, "users:");
        let mut stmt = conn.prepare("SELECT name, pass FROM users ORDER BY name")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let pass: String = row.get(1)?;
            let _ = writeln!(out, "  name={:?} pass={:?}", name, pass);
        }

        let _ = writeln!(out, "series:");
        let mut stmt = conn.prepare(
            "SELECT sid, title, author, mod_time, position FROM series ORDER BY position",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let sid: String = row.get(0)?;
            let title: String = row.get(1)?;
            let author: Option<String> = row.get(2)?;
            let mod_time: i64 = row.get(3)?;
            let position: i64 = row.get(4)?;
            let _ = writeln!(
                out,
                "  sid={} title={:?} author={:?} mod_time={} position={}",
                sid, title, author, mod_time, position
            );
        }

        let _ = writeln!(out, "entries:");
        let mut stmt = conn.prepare(
            "SELECT e.sid, e.eid, e.title, e.archive, e.mod_time, e.filesize, e.pages, e.position
             FROM entries e JOIN series s ON s.sid = e.sid
             ORDER BY s.position, e.position",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let sid: String = row.get(0)?;
            let eid: String = row.get(1)?;
            let title: String = row.get(2)?;
            let archive: String = row.get(3)?;
            let mod_time: i64 = row.get(4)?;
            let filesize: i64 = row.get(5)?;
            let pages: String = row.get(6)?;
            let position: i64 = row.get(7)?;
            let _ = writeln!(
                out,
                "  sid={} eid={} title={:?} archive={:?} mod_time={} filesize={} position={} pages={}",
                sid, eid, title, archive, mod_time, filesize, position, pages
            );
        }

        let _ = writeln!(out, "thumbnails:");
        let mut stmt = conn.prepare(
            "SELECT sid, eid, mod_time, length(data) FROM thumbnails ORDER BY sid, eid",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let sid: String = row.get(0)?;
            let eid: String = row.get(1)?;
            let mod_time: i64 = row.get(2)?;
            let size: i64 = row.get(3)?;
            let _ = writeln!(
                out,
                "  sid={} eid={} mod_time={} data=<{} bytes>",
                sid, eid, mod_time, size
            );
        }

        Ok(out)
    }
}
