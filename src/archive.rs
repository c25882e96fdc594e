//! Comic archive reading (ZIP/CBZ and RAR/CBR).
//!
//! An archive is opened once per operation, its members are validated as
//! images and returned in reading order. Both container formats sit behind
//! the [`MemberSource`] trait and are dispatched through [`Archive`].

mod rar;
mod zip;

pub use self::rar::RarSource;
pub use self::zip::ZipSource;

use crate::error::{AppError, Result};
use crate::library::natural_cmp;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Container format of an archive, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// ZIP container (`.zip`, `.cbz`).
    Zip,
    /// RAR container (`.rar`, `.cbr`).
    Rar,
}

impl ArchiveKind {
    /// Try to detect the container from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "zip" | "cbz" => Some(ArchiveKind::Zip),
            "rar" | "cbr" => Some(ArchiveKind::Rar),
            _ => None,
        }
    }

    /// Detect the container of a path, failing with `InvalidArchiveType`.
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| AppError::InvalidArchiveType(path.display().to_string()))
    }

    /// Short label used in feed summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "ZIP",
            ArchiveKind::Rar => "RAR",
        }
    }

    /// MIME type advertised for the raw archive download.
    pub fn mime_type(&self, path: &Path) -> &'static str {
        let comic = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.to_lowercase().starts_with("cb"));

        match (self, comic) {
            (ArchiveKind::Zip, true) => "application/vnd.comicbook+zip",
            (ArchiveKind::Zip, false) => "application/zip",
            (ArchiveKind::Rar, true) => "application/vnd.comicbook-rar",
            (ArchiveKind::Rar, false) => "application/vnd.rar",
        }
    }
}

/// Image MIME type for an archive member name, by extension.
pub fn image_mime(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// A single page of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Member name inside the archive, including any directory prefix.
    pub path: String,
    /// Image MIME type.
    pub mime: String,
}

/// Raw directory record of an archive.
#[derive(Debug, Clone)]
pub struct Member {
    /// Member name as recorded by the container, `/`-separated.
    pub name: String,
    /// Whether the record is a directory.
    pub is_dir: bool,
}

/// Capabilities shared by every container format.
pub trait MemberSource {
    /// List all directory records in container order.
    fn members(&mut self) -> Result<Vec<Member>>;

    /// Read the full contents of a member.
    fn read_member(&mut self, path: &str) -> Result<Vec<u8>>;
}

/// An opened archive.
pub enum Archive {
    /// ZIP-backed archive.
    Zip(ZipSource),
    /// RAR-backed archive.
    Rar(RarSource),
}

impl Archive {
    /// Open an archive. The container is chosen by extension before any I/O.
    pub fn open(path: &Path) -> Result<Self> {
        match ArchiveKind::from_path(path)? {
            ArchiveKind::Zip => Ok(Archive::Zip(ZipSource::open(path)?)),
            ArchiveKind::Rar => Ok(Archive::Rar(RarSource::open(path)?)),
        }
    }

    /// Container format of this archive.
    pub fn kind(&self) -> ArchiveKind {
        match self {
            Archive::Zip(_) => ArchiveKind::Zip,
            Archive::Rar(_) => ArchiveKind::Rar,
        }
    }

    /// List pages in reading order.
    ///
    /// Directories, dotfiles and macOS resource forks are skipped. Any other
    /// member that is not an image fails the whole archive, as does an
    /// archive with no pages at all.
    pub fn list_pages(&mut self, archive: &Path) -> Result<Vec<Page>> {
        let mut pages = Vec::new();

        for member in self.members()? {
            if member.is_dir || is_hidden(&member.name) {
                continue;
            }

            let mime = image_mime(&member.name).ok_or_else(|| AppError::InvalidPage {
                archive: archive.display().to_string(),
                member: member.name.clone(),
            })?;

            pages.push(Page {
                path: member.name,
                mime: mime.to_string(),
            });
        }

        if pages.is_empty() {
            return Err(AppError::NoPages(archive.display().to_string()));
        }

        pages.sort_by(|a, b| {
            natural_cmp(base_name(&a.path), base_name(&b.path)).then_with(|| a.path.cmp(&b.path))
        });

        Ok(pages)
    }
}

impl MemberSource for Archive {
    fn members(&mut self) -> Result<Vec<Member>> {
        match self {
            Archive::Zip(source) => source.members(),
            Archive::Rar(source) => source.members(),
        }
    }

    fn read_member(&mut self, path: &str) -> Result<Vec<u8>> {
        match self {
            Archive::Zip(source) => source.read_member(path),
            Archive::Rar(source) => source.read_member(path),
        }
    }
}

/// Parsed archive with its file metadata.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Container format.
    pub kind: ArchiveKind,
    /// Pages in reading order.
    pub pages: Vec<Page>,
    /// File size in bytes.
    pub filesize: i64,
    /// Modification time (unix seconds).
    pub mod_time: i64,
}

/// Open an archive, list its pages and read its file metadata.
pub fn parse(path: &Path) -> Result<ArchiveInfo> {
    let mut archive = Archive::open(path)?;
    let pages = archive.list_pages(path)?;
    let metadata = std::fs::metadata(path)?;

    Ok(ArchiveInfo {
        kind: archive.kind(),
        pages,
        filesize: metadata.len() as i64,
        mod_time: mod_time(&metadata),
    })
}

/// Modification time of a file in unix seconds (0 when unavailable).
pub fn mod_time(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Final path component of a member name.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Dotfiles and resource forks at any depth. A bare `.` component is the
/// current directory, not a hidden one.
fn is_hidden(path: &str) -> bool {
    path.split('/')
        .any(|part| (part != "." && part.starts_with('.')) || part == "__MACOSX")
}
