//! Deterministic hashing utilities
//!
//! All cache-keying hashes in strobe go through blake3. The standard library's
//! `DefaultHasher` is seeded randomly per process and `FxHasher` is not
//! guaranteed stable across versions; both are unusable for hashes that end up
//! in URLs (`?v=`) or in the persisted optimizer metadata, which must survive
//! process restarts.
//!
//! # Usage
//!
//! ```ignore
//! use crate::utils::hash::{StableHasher, short_hash};
//!
//! // Short fingerprint for cache-busting queries
//! let v = short_hash("lodash@4.17.21");
//!
//! // Builder for composite hashes
//! let h = StableHasher::new()
//!     .update_str(&lockfile)
//!     .update_str(&config_json)
//!     .finish_hex();
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Number of hex characters in a short hash (`?v=` queries, browser hashes).
pub const SHORT_HASH_LEN: usize = 8;

// =============================================================================
// StableHasher - Builder Pattern
// =============================================================================

/// A deterministic hasher using blake3.
///
/// Produces the same output across process restarts for the same input.
pub struct StableHasher {
    inner: blake3::Hasher,
}

impl StableHasher {
    /// Create a new StableHasher
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Update with raw bytes
    #[inline]
    pub fn update(mut self, data: &[u8]) -> Self {
        self.inner.update(data);
        self
    }

    /// Update with a string
    #[inline]
    pub fn update_str(self, s: &str) -> Self {
        self.update(s.as_bytes())
    }

    /// Update with a u64 value (little-endian)
    #[inline]
    pub fn update_u64(self, v: u64) -> Self {
        self.update(&v.to_le_bytes())
    }

    /// Finish and return the full 64-char hex digest.
    #[inline]
    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize().as_bytes())
    }

    /// Finish and return a short hex digest.
    #[inline]
    pub fn finish_short(self) -> String {
        let mut hex = self.finish_hex();
        hex.truncate(SHORT_HASH_LEN);
        hex
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Short fingerprint of a string (8 hex chars).
#[inline]
pub fn short_hash(s: &str) -> String {
    StableHasher::new().update_str(s).finish_short()
}

/// Short fingerprint of raw bytes (8 hex chars).
#[inline]
pub fn short_hash_bytes(data: &[u8]) -> String {
    StableHasher::new().update(data).finish_short()
}

/// Hash a file's contents to a short hex digest (streaming).
///
/// Returns `None` if the file cannot be read.
pub fn file_hash(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return None,
        }
    }

    let mut hex = hex::encode(hasher.finalize().as_bytes());
    hex.truncate(SHORT_HASH_LEN);
    Some(hex)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_deterministic() {
        assert_eq!(short_hash("hello world"), short_hash("hello world"));
    }

    #[test]
    fn test_different_inputs() {
        assert_ne!(short_hash("hello"), short_hash("world"));
    }

    #[test]
    fn test_short_hash_length() {
        assert_eq!(short_hash("anything").len(), SHORT_HASH_LEN);
    }

    #[test]
    fn test_builder_order_matters() {
        let h1 = StableHasher::new().update_str("a").update_str("b").finish_hex();
        let h2 = StableHasher::new().update_str("b").update_str("a").finish_hex();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_builder_reproducible() {
        let h1 = StableHasher::new()
            .update_str("tag")
            .update_u64(42)
            .finish_short();
        let h2 = StableHasher::new()
            .update_str("tag")
            .update_u64(42)
            .finish_short();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_file_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dep.js");
        fs::write(&path, "export default 1;").unwrap();

        let h1 = file_hash(&path).unwrap();
        let h2 = file_hash(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), SHORT_HASH_LEN);

        fs::write(&path, "export default 2;").unwrap();
        let h3 = file_hash(&path).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_file_hash_nonexistent() {
        assert!(file_hash(Path::new("/nonexistent/file.js")).is_none());
    }
}
