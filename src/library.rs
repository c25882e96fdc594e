//! Library scanning and catalog identity.

mod natural;
mod scanner;

pub use natural::natural_cmp;
pub use scanner::{ScanOptions, ScannedSeries, Snapshot, scan};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in an identifier (16 base64url characters).
const ID_BYTES: usize = 12;

/// Derive a stable identifier from a title.
///
/// Series ids hash the folder name, entry ids hash the archive title and are
/// scoped by their series id, so the same function serves both.
pub fn make_id(title: &str) -> String {
    let digest = Sha256::digest(title.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..ID_BYTES])
}
