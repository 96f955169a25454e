//! Persisted optimizer cache.
//!
//! The cache directory holds the bundled artifacts plus one metadata file.
//! On startup, a metadata file whose `hash` matches the current inputs is
//! loaded and treated as authoritative; anything else means the directory is
//! rebuilt from scratch.

use jwalk::WalkDir;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::metadata::DepMetadata;
use crate::debug;
use crate::utils::hash::file_hash;

/// Metadata file name inside the cache directory.
pub const METADATA_FILE: &str = "_metadata.json";

/// Load persisted metadata if it matches the current input hash.
pub fn load_metadata(cache_dir: &Path, expected_hash: &str) -> Option<DepMetadata> {
    let path = cache_dir.join(METADATA_FILE);
    let contents = fs::read_to_string(&path).ok()?;
    let metadata: DepMetadata = serde_json::from_str(&contents).ok()?;

    if metadata.hash != expected_hash {
        debug!("optimize"; "cache hash mismatch ({} != {}), rebundling", metadata.hash, expected_hash);
        return None;
    }
    Some(metadata)
}

/// Persist metadata atomically (temp file + rename).
pub fn save_metadata(cache_dir: &Path, metadata: &DepMetadata) -> io::Result<()> {
    fs::create_dir_all(cache_dir)?;
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = cache_dir.join(format!("{METADATA_FILE}.tmp"));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, cache_dir.join(METADATA_FILE))?;
    Ok(())
}

/// Remove the entire cache directory.
pub fn clear_cache(cache_dir: &Path) -> io::Result<()> {
    if cache_dir.exists() {
        fs::remove_dir_all(cache_dir)?;
    }
    Ok(())
}

/// Hash every bundled artifact on disk (relative path -> short hash).
///
/// Used to cross-check persisted `file_hash` values against the artifacts
/// actually present in the cache dir.
pub fn hash_artifacts(cache_dir: &Path) -> Vec<(PathBuf, String)> {
    let mut files: Vec<PathBuf> = WalkDir::new(cache_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "js"))
        .collect();
    files.sort();

    files
        .into_iter()
        .filter_map(|path| {
            let hash = file_hash(&path)?;
            let rel = path.strip_prefix(cache_dir).unwrap_or(&path).to_path_buf();
            Some((rel, hash))
        })
        .collect()
}

/// Whether every optimized dep's persisted hash matches its artifact.
pub fn artifacts_consistent(metadata: &DepMetadata, _cache_dir: &Path) -> bool {
    metadata.optimized.values().all(|dep| {
        match (&dep.file_hash, file_hash(&dep.file)) {
            (Some(expected), Some(actual)) => *expected == actual,
            (None, _) => true,
            (Some(_), None) => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::metadata::DepInfo;
    use tempfile::TempDir;

    fn sample_metadata(hash: &str) -> DepMetadata {
        let mut meta = DepMetadata::new(hash.to_string());
        meta.optimized.insert(
            "react".to_string(),
            DepInfo {
                id: "react".to_string(),
                file: PathBuf::from("/cache/deps/react.js"),
                src: None,
                file_hash: Some("aabbccdd".to_string()),
                browser_hash: meta.browser_hash.clone(),
                needs_interop: Some(false),
                exports_data: None,
                processing: None,
            },
        );
        meta
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let meta = sample_metadata("h1");

        save_metadata(dir.path(), &meta).unwrap();
        let loaded = load_metadata(dir.path(), "h1").unwrap();

        assert_eq!(loaded.hash, "h1");
        assert_eq!(loaded.browser_hash, meta.browser_hash);
        assert!(loaded.optimized.contains_key("react"));
    }

    #[test]
    fn test_load_rejects_hash_mismatch() {
        let dir = TempDir::new().unwrap();
        save_metadata(dir.path(), &sample_metadata("h1")).unwrap();
        assert!(load_metadata(dir.path(), "h2").is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_metadata(dir.path(), "h1").is_none());
    }

    #[test]
    fn test_clear_cache() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("dep.js"), "x").unwrap();

        clear_cache(&cache).unwrap();
        assert!(!cache.exists());
        // Clearing a missing dir is fine.
        clear_cache(&cache).unwrap();
    }

    #[test]
    fn test_hash_artifacts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "aaa").unwrap();
        fs::write(dir.path().join("b.js"), "bbb").unwrap();
        fs::write(dir.path().join("_metadata.json"), "{}").unwrap();

        let hashes = hash_artifacts(dir.path());
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].0, PathBuf::from("a.js"));
    }

    #[test]
    fn test_artifacts_consistent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("react.js");
        fs::write(&file, "export default {}").unwrap();

        let mut meta = DepMetadata::new("h".to_string());
        meta.optimized.insert(
            "react".to_string(),
            DepInfo {
                id: "react".to_string(),
                file: file.clone(),
                src: None,
                file_hash: file_hash(&file),
                browser_hash: "x".to_string(),
                needs_interop: None,
                exports_data: None,
                processing: None,
            },
        );
        assert!(artifacts_consistent(&meta, dir.path()));

        fs::write(&file, "export default { changed: true }").unwrap();
        assert!(!artifacts_consistent(&meta, dir.path()));
    }
}
