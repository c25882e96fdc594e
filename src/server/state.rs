//! Application state shared across handlers and background tasks.

use crate::config::Config;
use crate::db::{Database, SyncStats};
use crate::error::Result;
use crate::library;
use crate::opds::{self, FeedOptions};
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Catalog store.
    pub db: Database,
    /// Feed rendering settings.
    pub feed: Arc<FeedOptions>,
    /// OpenSearch description, identical for every request.
    opensearch: Arc<str>,
    /// Serializes scan passes between the timer and the control channel.
    scan_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Create application state around an opened store.
    pub fn new(config: Config, db: Database) -> Self {
        let feed = config.feed_options();
        let opensearch = opds::generate_opensearch(&feed.title);
        let db = db.with_thumbnail_options(config.thumbnail_options());

        Self {
            config: Arc::new(config),
            db,
            feed: Arc::new(feed),
            opensearch: opensearch.into(),
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    /// OpenSearch description document.
    pub fn opensearch(&self) -> &str {
        &self.opensearch
    }

    /// Scan the library and synchronize the catalog. Blocking.
    ///
    /// Concurrent callers wait for the running pass and then run their own,
    /// so a caller always observes a catalog at least as new as its request.
    pub fn rescan(&self) -> Result<SyncStats> {
        let _guard = self.scan_lock.lock();

        let root = &self.config.library.root;
        tracing::info!(root = %root.display(), "Scanning library");

        let snapshot = library::scan(root, &self.config.scan_options())?;
        self.db.populate_catalog(&snapshot)
    }
}
