//! Catalog synchronization and the queries the feeds are built from.

use super::{Database, Entry, Series};
use crate::error::{AppError, Result};
use crate::library::{ScannedSeries, Snapshot, natural_cmp};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};

const SERIES_COLUMNS: &str = "sid, title, author, mod_time, position";
const ENTRY_COLUMNS: &str = "sid, eid, title, archive, mod_time, filesize, pages, position";

/// Counters of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Series in the snapshot.
    pub series: usize,
    /// Entries in the snapshot.
    pub entries: usize,
    /// Entries inserted or re-created because their archive changed.
    pub replaced: usize,
    /// Series rows swept because they vanished from disk.
    pub removed_series: usize,
    /// Entry rows swept because they vanished from disk.
    pub removed_entries: usize,
}

impl Database {
    /// Make the persisted catalog exactly match a scan snapshot.
    ///
    /// Runs as one transaction: every row is marked missing, the snapshot is
    /// upserted with fresh positions, and whatever is still marked gets
    /// deleted. Entries whose archive changed are re-created so their cached
    /// thumbnail goes with them.
    pub fn populate_catalog(&self, snapshot: &Snapshot) -> Result<SyncStats> {
        let start = std::time::Instant::now();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut stats = SyncStats::default();

        tx.execute("UPDATE series SET missing = 1", [])?;
        tx.execute("UPDATE entries SET missing = 1", [])?;

        let mut ordered: Vec<&ScannedSeries> = snapshot.values().collect();
        ordered.sort_by(|a, b| {
            natural_cmp(&a.series.title, &b.series.title)
                .then_with(|| a.series.title.cmp(&b.series.title))
        });

        for (index, scanned) in ordered.iter().enumerate() {
            upsert_series(&tx, &scanned.series, index as i64 + 1)?;
            stats.series += 1;

            for (position, entry) in scanned.entries.iter().enumerate() {
                if upsert_entry(&tx, &scanned.series.sid, entry, position as i64 + 1)? {
                    stats.replaced += 1;
                }
                stats.entries += 1;
            }
        }

        // Entries first so the counters are not hidden by the cascade.
        stats.removed_entries = tx.execute("DELETE FROM entries WHERE missing = 1", [])?;
        stats.removed_series = tx.execute("DELETE FROM series WHERE missing = 1", [])?;

        tx.commit()?;

        tracing::info!(
            series = stats.series,
            entries = stats.entries,
            replaced = stats.replaced,
            removed_series = stats.removed_series,
            removed_entries = stats.removed_entries,
            elapsed = ?start.elapsed(),
            "Catalog synchronized"
        );

        Ok(stats)
    }

    /// All series in catalog order.
    pub fn list_series(&self) -> Result<Vec<Series>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SERIES_COLUMNS} FROM series ORDER BY position"
        ))?;

        let series = stmt
            .query_map([], row_to_series)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(series)
    }

    /// Get series by id.
    pub fn get_series(&self, sid: &str) -> Result<Option<Series>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {SERIES_COLUMNS} FROM series WHERE sid = ?1"),
            params![sid],
            row_to_series,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get series: {}", e)))
    }

    /// Entries of a series in reading order.
    pub fn list_entries(&self, sid: &str) -> Result<Vec<Entry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE sid = ?1 ORDER BY position"
        ))?;

        let entries = stmt
            .query_map(params![sid], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Get entry by series and entry id.
    pub fn get_entry(&self, sid: &str, eid: &str) -> Result<Option<Entry>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE sid = ?1 AND eid = ?2"),
            params![sid, eid],
            row_to_entry,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get entry: {}", e)))
    }

    /// Get entry or fail with `NotFound`.
    pub fn require_entry(&self, sid: &str, eid: &str) -> Result<Entry> {
        self.get_entry(sid, eid)?
            .ok_or_else(|| AppError::NotFound(format!("entry {}/{}", sid, eid)))
    }

    /// Latest modification time across the catalog (0 when empty).
    pub fn latest_mod_time(&self) -> Result<i64> {
        let conn = self.lock();
        let latest: Option<i64> =
            conn.query_row("SELECT MAX(mod_time) FROM series", [], |row| row.get(0))?;
        Ok(latest.unwrap_or(0))
    }
}

fn upsert_series(tx: &Transaction<'_>, series: &Series, position: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO series (sid, title, author, mod_time, position, missing)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)
         ON CONFLICT (sid) DO UPDATE SET
            title = excluded.title,
            author = excluded.author,
            mod_time = excluded.mod_time,
            position = excluded.position,
            missing = 0",
        params![
            series.sid,
            series.title,
            series.author,
            series.mod_time,
            position,
        ],
    )?;
    Ok(())
}

/// Upsert an entry; returns true when the row was (re-)created.
fn upsert_entry(tx: &Transaction<'_>, sid: &str, entry: &Entry, position: i64) -> Result<bool> {
    let pages = serde_json::to_string(&entry.pages)
        .map_err(|e| AppError::Internal(format!("Failed to encode pages: {}", e)))?;

    let stored: Option<i64> = tx
        .query_row(
            "SELECT mod_time FROM entries WHERE sid = ?1 AND eid = ?2",
            params![sid, entry.eid],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(mod_time) if mod_time == entry.mod_time => {
            tx.execute(
                "UPDATE entries
                 SET title = ?3, archive = ?4, filesize = ?5, pages = ?6, position = ?7, missing = 0
                 WHERE sid = ?1 AND eid = ?2",
                params![
                    sid,
                    entry.eid,
                    entry.title,
                    entry.archive,
                    entry.filesize,
                    pages,
                    position,
                ],
            )?;
            return Ok(false);
        }
        Some(_) => {
            tracing::debug!(sid = %sid, eid = %entry.eid, "Archive changed, re-creating entry");
            tx.execute(
                "DELETE FROM entries WHERE sid = ?1 AND eid = ?2",
                params![sid, entry.eid],
            )?;
        }
        None => {}
    }

    tx.execute(
        "INSERT INTO entries (sid, eid, title, archive, mod_time, filesize, pages, position, missing)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            sid,
            entry.eid,
            entry.title,
            entry.archive,
            entry.mod_time,
            entry.filesize,
            pages,
            position,
        ],
    )?;

    Ok(true)
}

fn row_to_series(row: &rusqlite::Row<'_>) -> rusqlite::Result<Series> {
    Ok(Series {
        sid: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        mod_time: row.get(3)?,
        position: row.get(4)?,
    })
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let pages: String = row.get(6)?;
    let pages = serde_json::from_str(&pages)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(Entry {
        sid: row.get(0)?,
        eid: row.get(1)?,
        title: row.get(2)?,
        archive: row.get(3)?,
        mod_time: row.get(4)?,
        filesize: row.get(5)?,
        pages,
        position: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Page, Thumbnail};
    use crate::library::make_id;

    /// Build a snapshot entry without touching the filesystem.
    fn entry(series: &str, title: &str, mod_time: i64) -> Entry {
        Entry {
            sid: make_id(series),
            eid: make_id(title),
            title: title.to_string(),
            archive: format!("/library/{}/{}.cbz", series, title),
            mod_time,
            filesize: 1024,
            pages: vec![Page {
                path: "01.jpg".to_string(),
                mime: "image/jpeg".to_string(),
            }],
            position: 0,
        }
    }

    fn snapshot(series: &[(&str, Vec<Entry>)]) -> Snapshot {
        series
            .iter()
            .map(|(title, entries)| {
                let sid = make_id(title);
                let scanned = ScannedSeries {
                    series: Series {
                        sid: sid.clone(),
                        title: title.to_string(),
                        author: None,
                        mod_time: entries.iter().map(|e| e.mod_time).max().unwrap_or(0),
                        position: 0,
                    },
                    entries: entries.clone(),
                };
                (sid, scanned)
            })
            .collect()
    }

    fn thumbnail(sid: &str, eid: &str, mod_time: i64) -> Thumbnail {
        Thumbnail {
            sid: sid.to_string(),
            eid: eid.to_string(),
            data: vec![1, 2, 3],
            mod_time,
        }
    }

    #[test]
    fn positions_follow_natural_title_order() {
        let db = Database::open_memory().unwrap();
        let snap = snapshot(&[
            ("Vol 10", vec![entry("Vol 10", "a", 1)]),
            ("vol 2", vec![entry("vol 2", "a", 1)]),
            ("Akira", vec![entry("Akira", "Akira 2", 1), entry("Akira", "Akira 10", 1)]),
        ]);

        db.populate_catalog(&snap).unwrap();

        let series = db.list_series().unwrap();
        let titles: Vec<&str> = series.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Akira", "vol 2", "Vol 10"]);
        let positions: Vec<i64> = series.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let entries = db.list_entries(&make_id("Akira")).unwrap();
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        // Scan order is kept for entries.
        assert_eq!(titles, vec!["Akira 2", "Akira 10"]);
        assert_eq!(entries[1].position, 2);
        assert_eq!(entries[0].pages.len(), 1);
    }

    #[test]
    fn populate_is_idempotent() {
        let db = Database::open_memory().unwrap();
        let snap = snapshot(&[
            ("Akira", vec![entry("Akira", "Akira 01", 10)]),
            ("Blame", vec![entry("Blame", "Blame 01", 20)]),
        ]);

        let first = db.populate_catalog(&snap).unwrap();
        assert_eq!(first.replaced, 2);
        let before = db.dump().unwrap();

        let second = db.populate_catalog(&snap).unwrap();
        assert_eq!(second.replaced, 0);
        assert_eq!(second.removed_entries, 0);
        assert_eq!(db.dump().unwrap(), before);
    }

    #[test]
    fn sweep_removes_vanished_rows_with_cascade() {
        let db = Database::open_memory().unwrap();
        let full = snapshot(&[
            ("Akira", vec![entry("Akira", "Akira 01", 10), entry("Akira", "Akira 02", 10)]),
            ("Blame", vec![entry("Blame", "Blame 01", 20)]),
        ]);
        db.populate_catalog(&full).unwrap();

        let akira = make_id("Akira");
        let blame = make_id("Blame");
        db.put_thumbnail(&thumbnail(&blame, &make_id("Blame 01"), 20))
            .unwrap();
        db.put_thumbnail(&thumbnail(&akira, &make_id("Akira 02"), 10))
            .unwrap();
        db.put_thumbnail(&thumbnail(&akira, &make_id("Akira 01"), 10))
            .unwrap();

        let subset = snapshot(&[("Akira", vec![entry("Akira", "Akira 01", 10)])]);
        let stats = db.populate_catalog(&subset).unwrap();
        assert_eq!(stats.removed_series, 1);
        assert_eq!(stats.removed_entries, 2);

        assert!(db.get_series(&blame).unwrap().is_none());
        assert!(db.list_entries(&blame).unwrap().is_empty());
        assert!(db.get_entry(&akira, &make_id("Akira 02")).unwrap().is_none());

        assert!(
            db.cached_thumbnail(&blame, &make_id("Blame 01"))
                .unwrap()
                .is_none()
        );
        assert!(
            db.cached_thumbnail(&akira, &make_id("Akira 02"))
                .unwrap()
                .is_none()
        );
        // Untouched entry keeps its cache.
        assert!(
            db.cached_thumbnail(&akira, &make_id("Akira 01"))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn failed_sync_leaves_catalog_untouched() {
        let db = Database::open_memory().unwrap();
        db.populate_catalog(&snapshot(&[
            ("Akira", vec![entry("Akira", "Akira 01", 10)]),
            ("Blame", vec![entry("Blame", "Blame 01", 20)]),
        ]))
        .unwrap();
        db.put_thumbnail(&thumbnail(&make_id("Blame"), &make_id("Blame 01"), 20))
            .unwrap();
        let before = db.dump().unwrap();

        db.lock()
            .execute_batch(
                "CREATE TRIGGER reject_cursed BEFORE INSERT ON entries
                 WHEN NEW.title = 'Cursed 01'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        // Would shift Akira to position 2 and sweep Blame.
        let result = db.populate_catalog(&snapshot(&[
            ("Aardvark", vec![entry("Aardvark", "Cursed 01", 30)]),
            ("Akira", vec![entry("Akira", "Akira 01", 10)]),
        ]));
        assert!(result.is_err());

        assert_eq!(db.dump().unwrap(), before);
        assert_eq!(db.get_series(&make_id("Akira")).unwrap().unwrap().position, 1);
        assert!(db.get_series(&make_id("Blame")).unwrap().is_some());
    }

    #[test]
    fn changed_archive_drops_its_thumbnail() {
        let db = Database::open_memory().unwrap();
        let sid = make_id("Akira");
        let eid = make_id("Akira 01");
        db.populate_catalog(&snapshot(&[("Akira", vec![entry("Akira", "Akira 01", 10)])]))
            .unwrap();
        db.put_thumbnail(&thumbnail(&sid, &eid, 10)).unwrap();

        let stats = db
            .populate_catalog(&snapshot(&[("Akira", vec![entry("Akira", "Akira 01", 11)])]))
            .unwrap();
        assert_eq!(stats.replaced, 1);
        assert_eq!(db.require_entry(&sid, &eid).unwrap().mod_time, 11);
        assert!(db.cached_thumbnail(&sid, &eid).unwrap().is_none());
    }

    #[test]
    fn empty_snapshot_clears_catalog() {
        let db = Database::open_memory().unwrap();
        db.populate_catalog(&snapshot(&[("Akira", vec![entry("Akira", "Akira 01", 10)])]))
            .unwrap();
        assert_eq!(db.latest_mod_time().unwrap(), 10);

        db.populate_catalog(&Snapshot::new()).unwrap();
        assert!(db.list_series().unwrap().is_empty());
        assert_eq!(db.latest_mod_time().unwrap(), 0);
    }

    #[test]
    fn unknown_entry_is_not_found() {
        let db = Database::open_memory().unwrap();
        assert!(matches!(
            db.require_entry("nope", "nope"),
            Err(AppError::NotFound(_))
        ));
    }
}
