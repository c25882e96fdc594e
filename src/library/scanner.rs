//! Filesystem scan producing a catalog snapshot.

use super::{make_id, natural_cmp};
use crate::archive::{self, ArchiveKind};
use crate::db::{Entry, Series};
use crate::error::{AppError, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Scan settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Name of the per-series sidecar file holding the author.
    pub author_file: String,
    /// Number of parallel workers (1 = sequential).
    pub workers: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            author_file: "author.txt".to_string(),
            workers: 1,
        }
    }
}

/// A series found on disk with its entries in reading order.
#[derive(Debug, Clone)]
pub struct ScannedSeries {
    /// Series row (position assigned on synchronization).
    pub series: Series,
    /// Entries in natural title order (positions assigned on synchronization).
    pub entries: Vec<Entry>,
}

/// Catalog snapshot keyed by series id.
pub type Snapshot = BTreeMap<String, ScannedSeries>;

/// Scan a library root: every top-level directory is a series and every
/// archive below it an entry.
///
/// Failures are scoped: an unreadable series or archive is logged and
/// skipped. Only an unreadable root fails the scan.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<Snapshot> {
    let start = std::time::Instant::now();
    let dirs = series_dirs(root)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build scan pool: {}", e)))?;

    let scanned: Vec<ScannedSeries> = pool.install(|| {
        dirs.par_iter()
            .filter_map(|dir| match scan_series(dir, options) {
                Ok(series) => series,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Skipping series");
                    None
                }
            })
            .collect()
    });

    let mut snapshot = Snapshot::new();
    for series in scanned {
        let sid = series.series.sid.clone();
        if let Some(previous) = snapshot.insert(sid, series) {
            tracing::warn!(title = %previous.series.title, "Series id collision, keeping last");
        }
    }

    tracing::info!(
        series = snapshot.len(),
        entries = snapshot.values().map(|s| s.entries.len()).sum::<usize>(),
        elapsed = ?start.elapsed(),
        "Library scan complete"
    );

    Ok(snapshot)
}

/// Top-level, non-hidden directories of the root.
fn series_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for dirent in std::fs::read_dir(root)? {
        let path = dirent?.path();
        if is_hidden(&path) || !path.is_dir() {
            continue;
        }
        dirs.push(path);
    }

    Ok(dirs)
}

fn scan_series(dir: &Path, options: &ScanOptions) -> Result<Option<ScannedSeries>> {
    let title = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AppError::Internal(format!("No folder name: {}", dir.display())))?;
    let sid = make_id(&title);
    let author = read_author(&dir.join(&options.author_file))?;

    let mut archives: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && !is_hidden(e.path()))
        .map(|e| e.into_path())
        .filter(|p| ArchiveKind::from_path(p).is_ok())
        .collect();
    archives.sort_by(|a, b| {
        natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()).then_with(|| a.cmp(b))
    });

    let parsed: Vec<Option<Entry>> = archives
        .par_iter()
        .map(|path| match scan_entry(&sid, path) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping archive");
                None
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for entry in parsed.into_iter().flatten() {
        if !seen.insert(entry.eid.clone()) {
            tracing::warn!(
                series = %title,
                archive = %entry.archive,
                "Duplicate archive title in series, skipping"
            );
            continue;
        }
        entries.push(entry);
    }

    if entries.is_empty() {
        tracing::debug!(series = %title, "No archives in series");
        return Ok(None);
    }

    entries.sort_by(|a, b| natural_cmp(&a.title, &b.title).then_with(|| a.title.cmp(&b.title)));
    let mod_time = entries.iter().map(|e| e.mod_time).max().unwrap_or(0);

    Ok(Some(ScannedSeries {
        series: Series {
            sid,
            title,
            author,
            mod_time,
            position: 0,
        },
        entries,
    }))
}

fn scan_entry(sid: &str, path: &Path) -> Result<Entry> {
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let info = archive::parse(path)?;
    let archive = std::path::absolute(path)?;

    Ok(Entry {
        sid: sid.to_string(),
        eid: make_id(&title),
        title,
        archive: archive.to_string_lossy().to_string(),
        mod_time: info.mod_time,
        filesize: info.filesize,
        pages: info.pages,
        position: 0,
    })
}

/// Read the author sidecar; a missing file means no author.
fn read_author(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let author = content.trim_end_matches(['\r', '\n']).to_string();
            Ok((!author.is_empty()).then_some(author))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
