//! comic-opds: a self-hosted OPDS server for comic and manga archives.
//!
//! The library folder is scanned into a SQLite catalog (one series per
//! top-level folder, one entry per CBZ/CBR archive) and served to e-readers
//! as OPDS 1.2 feeds with page streaming.
//!
//! # Features
//!
//! - OPDS 1.2 navigation and acquisition feeds
//! - Page Streaming Extension (per-page image URLs)
//! - ZIP/CBZ and RAR/CBR archives, with CP437 fallback for legacy ZIP names
//! - Cached JPEG thumbnails, invalidated when an archive changes
//! - Fuzzy catalog search and OpenSearch description
//! - HTTP Basic authentication
//! - Loopback control channel for rescans and user management

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Comic archive readers.
pub mod archive;
/// Password hashing and HTTP Basic credentials.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Catalog storage.
pub mod db;
/// Error types.
pub mod error;
/// Library scanning and identifiers.
pub mod library;
/// OPDS feed generation.
pub mod opds;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::{AppState, Server};
