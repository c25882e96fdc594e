//! Catalog storage: series, entries, users and the thumbnail cache.

mod catalog;
mod pages;
mod schema;
mod users;

pub use catalog::SyncStats;
pub use pages::{THUMBNAIL_MIME, ThumbnailOptions};
pub use schema::Database;

pub use crate::archive::Page;
use crate::archive::ArchiveKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A comic series: one top-level folder of the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    /// Stable identifier derived from the folder name.
    pub sid: String,
    /// Folder name.
    pub title: String,
    /// Author from the sidecar file, if any.
    pub author: Option<String>,
    /// Latest modification time of the series' entries (unix seconds).
    pub mod_time: i64,
    /// 1-based rank in natural title order.
    pub position: i64,
}

/// One archive of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Owning series.
    pub sid: String,
    /// Stable identifier derived from the archive title.
    pub eid: String,
    /// Archive file stem.
    pub title: String,
    /// Absolute path of the archive.
    pub archive: String,
    /// Archive modification time (unix seconds).
    pub mod_time: i64,
    /// Archive size in bytes.
    pub filesize: i64,
    /// Pages in reading order.
    pub pages: Vec<Page>,
    /// 1-based rank inside the series.
    pub position: i64,
}

impl Entry {
    /// Path of the archive on disk.
    pub fn archive_path(&self) -> &Path {
        Path::new(&self.archive)
    }

    /// Container format, from the archive extension.
    pub fn kind(&self) -> Option<ArchiveKind> {
        ArchiveKind::from_path(self.archive_path()).ok()
    }

    /// File name of the archive, used for downloads.
    pub fn file_name(&self) -> String {
        self.archive_path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.title.clone())
    }
}

/// Cached cover thumbnail of an entry.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// Owning series.
    pub sid: String,
    /// Owning entry.
    pub eid: String,
    /// JPEG bytes.
    pub data: Vec<u8>,
    /// Entry modification time the thumbnail was generated from.
    pub mod_time: i64,
}

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique login name.
    pub name: String,
    /// Argon2 password hash.
    #[serde(skip_serializing)]
    pub pass: String,
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
