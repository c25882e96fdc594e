//! Page, cover and thumbnail retrieval.

use super::{Database, Thumbnail};
use crate::archive::{Archive, MemberSource};
use crate::error::{AppError, Result};
use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use rusqlite::{OptionalExtension, params};
use std::io::Cursor;

/// MIME type of generated thumbnails.
pub const THUMBNAIL_MIME: &str = "image/jpeg";

/// Thumbnail generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailOptions {
    /// Bounding box width in pixels.
    pub width: u32,
    /// Bounding box height in pixels.
    pub height: u32,
    /// JPEG quality (1-100).
    pub quality: u8,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            width: 300,
            height: 300,
            quality: 85,
        }
    }
}

impl Database {
    /// Read one page of an entry. Indices are zero-based and never clamped.
    pub fn get_page(&self, sid: &str, eid: &str, index: usize) -> Result<(Vec<u8>, String)> {
        let entry = self.require_entry(sid, eid)?;
        let page = entry
            .pages
            .get(index)
            .ok_or(AppError::PageOutOfRange {
                index,
                count: entry.pages.len(),
            })?;

        let mut archive = Archive::open(entry.archive_path())?;
        let data = archive.read_member(&page.path)?;

        Ok((data, page.mime.clone()))
    }

    /// Full-size cover: the first page.
    pub fn get_cover(&self, sid: &str, eid: &str) -> Result<(Vec<u8>, String)> {
        self.get_page(sid, eid, 0)
    }

    /// Cover thumbnail, generated on first use and whenever the entry changed.
    pub fn get_thumbnail(&self, sid: &str, eid: &str) -> Result<(Vec<u8>, String)> {
        let entry = self.require_entry(sid, eid)?;

        if let Some(cached) = self.cached_thumbnail(sid, eid)? {
            if cached.mod_time == entry.mod_time {
                return Ok((cached.data, THUMBNAIL_MIME.to_string()));
            }
            tracing::debug!(sid = %sid, eid = %eid, "Thumbnail stale, regenerating");
        }

        let (page, _) = self.get_page(sid, eid, 0)?;
        let data = make_thumbnail(&page, &self.thumbnails)?;

        let thumbnail = Thumbnail {
            sid: sid.to_string(),
            eid: eid.to_string(),
            data,
            mod_time: entry.mod_time,
        };

        // The entry may have been swept since it was read.
        if let Err(e) = self.put_thumbnail(&thumbnail) {
            tracing::warn!(sid = %sid, eid = %eid, error = %e, "Failed to cache thumbnail");
        }

        Ok((thumbnail.data, THUMBNAIL_MIME.to_string()))
    }

    /// Cached thumbnail row, whether fresh or stale.
    pub fn cached_thumbnail(&self, sid: &str, eid: &str) -> Result<Option<Thumbnail>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT sid, eid, data, mod_time FROM thumbnails WHERE sid = ?1 AND eid = ?2",
            params![sid, eid],
            |row| {
                Ok(Thumbnail {
                    sid: row.get(0)?,
                    eid: row.get(1)?,
                    data: row.get(2)?,
                    mod_time: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get thumbnail: {}", e)))
    }

    /// Insert or replace a cached thumbnail.
    pub fn put_thumbnail(&self, thumbnail: &Thumbnail) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO thumbnails (sid, eid, data, mod_time)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (sid, eid) DO UPDATE SET
                data = excluded.data,
                mod_time = excluded.mod_time",
            params![
                thumbnail.sid,
                thumbnail.eid,
                thumbnail.data,
                thumbnail.mod_time,
            ],
        )?;
        Ok(())
    }
}

/// Fit an image into the bounding box, keeping its aspect ratio, and encode
/// it as JPEG.
fn make_thumbnail(data: &[u8], options: &ThumbnailOptions) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;

    let resized = img
        .resize(
            options.width,
            options.height,
            image::imageops::FilterType::CatmullRom,
        )
        .to_rgb8();

    let mut jpeg_data = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_data, options.quality);
    encoder.encode_image(&resized)?;

    Ok(jpeg_data)
}
