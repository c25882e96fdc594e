use crate::db::ThumbnailOptions;
use crate::error::{AppError, Result};
use crate::library::ScanOptions;
use crate::opds::FeedOptions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// OPDS server for comic and manga archives.
#[derive(Parser, Debug, Clone)]
#[command(name = "comic-opds")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "COMIC_OPDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the OPDS server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Path to the library directory.
        #[arg(short, long)]
        library: Option<PathBuf>,
    },

    /// Write a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Ask the running server to rescan the library now.
    Scan,

    /// Print every table of the running server's catalog.
    Dump,

    /// User management commands.
    User {
        /// User subcommand action.
        #[command(subcommand)]
        action: UserCommand,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommand {
    /// Add a new user.
    Add {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Delete a user.
    Del {
        /// Username to delete.
        username: String,
    },

    /// Rename a user.
    Rename {
        /// Current username.
        username: String,
        /// New username.
        new_name: String,
    },

    /// Change user password.
    Passwd {
        /// Username.
        username: String,
        /// New password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Library configuration.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scan configuration.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Thumbnail configuration.
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,

    /// Feed rendering configuration.
    #[serde(default)]
    pub opds: OpdsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the public OPDS listener.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Address of the control listener. Keep it on loopback.
    #[serde(default = "default_control_bind")]
    pub control_bind: SocketAddr,

    /// Catalog title.
    #[serde(default = "default_title")]
    pub title: String,

    /// Catalog author name.
    #[serde(default = "default_author")]
    pub author: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            control_bind: default_control_bind(),
            title: default_title(),
            author: default_author(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8080,
    )
}

fn default_control_bind() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 8081)
}

fn default_title() -> String {
    "Comics".to_string()
}

fn default_author() -> String {
    "comic-opds".to_string()
}

/// Library configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory whose top-level folders are series.
    #[serde(default = "default_library_root")]
    pub root: PathBuf,

    /// Per-series sidecar file holding the author name.
    #[serde(default = "default_author_file")]
    pub author_file: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            author_file: default_author_file(),
        }
    }
}

fn default_library_root() -> PathBuf {
    PathBuf::from("library")
}

fn default_author_file() -> String {
    "author.txt".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

/// Scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Rescan interval in seconds (0 to disable).
    #[serde(default = "default_scan_interval")]
    pub interval_seconds: u64,

    /// Database compaction interval in seconds (0 to disable).
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval_seconds: u64,

    /// Number of parallel workers for archive parsing (1 = sequential).
    /// Keep low for NAS/network storage to avoid saturation.
    #[serde(default = "default_scan_workers")]
    pub workers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_scan_interval(),
            compaction_interval_seconds: default_compaction_interval(),
            workers: default_scan_workers(),
        }
    }
}

fn default_scan_interval() -> u64 {
    300
}

fn default_compaction_interval() -> u64 {
    86_400
}

fn default_scan_workers() -> usize {
    1 // Sequential by default - safe for NAS/Raspberry Pi
}

/// Thumbnail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Bounding box width in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub width: u32,

    /// Bounding box height in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub height: u32,

    /// JPEG quality (1-100).
    #[serde(default = "default_thumbnail_quality")]
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_thumbnail_size(),
            height: default_thumbnail_size(),
            quality: default_thumbnail_quality(),
        }
    }
}

fn default_thumbnail_size() -> u32 {
    300
}

fn default_thumbnail_quality() -> u8 {
    85
}

/// Feed rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpdsConfig {
    /// Spaces of XML indentation (0 for compact output).
    #[serde(default = "default_indent")]
    pub indent: usize,
}

impl Default for OpdsConfig {
    fn default() -> Self {
        Self {
            indent: default_indent(),
        }
    }
}

fn default_indent() -> usize {
    2
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.thumbnail.quality) {
            return Err(AppError::Config(format!(
                "thumbnail.quality must be between 1 and 100, got {}",
                self.thumbnail.quality
            )));
        }
        if self.thumbnail.width == 0 || self.thumbnail.height == 0 {
            return Err(AppError::Config(
                "thumbnail.width and thumbnail.height must be positive".to_string(),
            ));
        }
        if self.server.bind == self.server.control_bind {
            return Err(AppError::Config(
                "server.bind and server.control_bind must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("comic-opds.toml"),
            dirs::config_dir()
                .map(|p| p.join("comic-opds").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/comic-opds/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Scanner settings.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            author_file: self.library.author_file.clone(),
            workers: self.scan.workers,
        }
    }

    /// Thumbnail generation settings.
    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            width: self.thumbnail.width,
            height: self.thumbnail.height,
            quality: self.thumbnail.quality,
        }
    }

    /// Feed rendering settings.
    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            title: self.server.title.clone(),
            author: self.server.author.clone(),
            indent: self.opds.indent,
        }
    }

    /// Base URL of the control channel.
    pub fn control_url(&self) -> String {
        let addr = self.server.control_bind;
        // A wildcard bind is reachable through loopback.
        let host = if addr.ip().is_unspecified() {
            match addr {
                SocketAddr::V4(_) => "127.0.0.1".to_string(),
                SocketAddr::V6(_) => "[::1]".to_string(),
            }
        } else {
            match addr {
                SocketAddr::V4(v4) => v4.ip().to_string(),
                SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
            }
        };
        format!("http://{}:{}", host, addr.port())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# comic-opds configuration

[server]
bind = "0.0.0.0:8080"
# Control channel used by the `scan`, `dump` and `user` commands
control_bind = "127.0.0.1:8081"
title = "Comics"
author = "comic-opds"

[library]
# Every top-level folder is a series
root = "library"
# Optional per-series file holding the author name
author_file = "author.txt"

[database]
# path = "/var/lib/comic-opds/catalog.db"

[scan]
# Rescan interval in seconds (0 to disable)
interval_seconds = 300
# Database compaction interval in seconds (0 to disable)
compaction_interval_seconds = 86400
# Parallel archive parsing (keep low on network storage)
workers = 1

[thumbnail]
width = 300
height = 300
quality = 85

[opds]
# Spaces of XML indentation (0 for compact output)
indent = 2
"#
        .to_string()
    }
}
