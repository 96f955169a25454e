//! Bundler contract.
//!
//! The actual bundling of third-party deps is a black-box batch operation:
//! it receives the snapshot of deps to bundle and produces new metadata plus
//! a two-way handle. The optimizer calls exactly one of `commit` (atomic
//! rename of the staging dir into the cache dir) or `cancel` (discard).

use rustc_hash::FxHashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use super::metadata::{DepInfo, DepMetadata};
use crate::debug;

/// Bundler failure. Never corrupts committed metadata; the optimizer clears
/// `discovered` and returns to idle.
#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    #[error("bundling failed: {0}")]
    Failed(String),
    #[error("bundler io error: {0}")]
    Io(#[from] io::Error),
}

/// Input snapshot for one batch.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Deps to bundle: last committed `optimized` plus `discovered`.
    pub deps: FxHashMap<String, DepInfo>,
    /// Final cache directory the commit must land in.
    pub cache_dir: PathBuf,
    /// Input hash the produced metadata should carry (unless inputs changed).
    pub inputs_hash: String,
}

/// Outcome of a bundler invocation, pending commit or cancel.
pub struct BundleResult {
    /// Metadata describing the produced bundle (hash, optimized, chunks).
    pub metadata: DepMetadata,
    /// Commit/cancel handle. Exactly one of the two is called.
    pub handle: Box<dyn BundleHandle>,
}

/// Two-way handle over a staged bundle.
pub trait BundleHandle: Send {
    /// Atomically move the staged artifacts into the cache dir.
    fn commit(self: Box<Self>) -> io::Result<()>;
    /// Discard the staged artifacts.
    fn cancel(self: Box<Self>);
}

/// Future type returned by [`Bundler::bundle`].
pub type BundleFuture = Pin<Box<dyn Future<Output = Result<BundleResult, BundlerError>> + Send>>;

/// The pre-bundler itself. May await (subprocess, network registry).
pub trait Bundler: Send + Sync {
    fn bundle(&self, request: BundleRequest) -> BundleFuture;
}

// =============================================================================
// Disk handle
// =============================================================================

/// Standard on-disk handle: the bundler writes everything into a staging
/// directory next to the cache dir; commit swaps it into place.
#[derive(Debug)]
pub struct DiskBundleHandle {
    pub staging: PathBuf,
    pub target: PathBuf,
}

impl BundleHandle for DiskBundleHandle {
    fn commit(self: Box<Self>) -> io::Result<()> {
        // Rename is atomic on the same filesystem; the stale dir is removed
        // first so the swap cannot merge old and new artifacts.
        if self.target.exists() {
            std::fs::remove_dir_all(&self.target)?;
        }
        if let Some(parent) = self.target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&self.staging, &self.target)?;
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        debug!("optimize"; "discarding staged bundle at {}", self.staging.display());
        let _ = std::fs::remove_dir_all(&self.staging);
    }
}

// =============================================================================
// Built-in copy bundler
// =============================================================================

/// Minimal built-in bundler: stages each dep's resolved entry as a
/// single-file artifact. Stands in where a real flattening bundler would be
/// wired; the contract (staging dir, metadata, commit/cancel) is identical.
pub struct CopyBundler;

impl Bundler for CopyBundler {
    fn bundle(&self, request: BundleRequest) -> BundleFuture {
        Box::pin(async move {
            use crate::utils::hash::{StableHasher, short_hash};

            let staging = staging_dir(&request.cache_dir);
            if staging.exists() {
                std::fs::remove_dir_all(&staging)?;
            }
            std::fs::create_dir_all(staging.join("deps"))?;

            let mut metadata = DepMetadata::new(request.inputs_hash.clone());

            let mut ids: Vec<&String> = request.deps.keys().collect();
            ids.sort();

            let mut content_hasher = StableHasher::new().update_str(&request.inputs_hash);
            let mut bundled = Vec::with_capacity(ids.len());
            for id in ids {
                let info = &request.deps[id];
                let code = match &info.src {
                    Some(src) => std::fs::read_to_string(src)
                        .map_err(|e| BundlerError::Failed(format!("{}: {e}", src.display())))?,
                    None => format!("// placeholder entry for {id}\nexport {{}};\n"),
                };
                let file_hash = short_hash(&code);
                content_hasher = content_hasher.update_str(&file_hash);

                let name = info
                    .file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{id}.js"));
                std::fs::write(staging.join("deps").join(&name), &code)?;

                bundled.push((id.clone(), info.clone(), file_hash, name));
            }

            let browser_hash = content_hasher.finish_short();
            metadata.browser_hash = browser_hash.clone();
            for (id, info, file_hash, name) in bundled {
                metadata.optimized.insert(
                    id.clone(),
                    DepInfo {
                        id,
                        file: request.cache_dir.join("deps").join(name),
                        src: info.src.clone(),
                        file_hash: Some(file_hash),
                        browser_hash: browser_hash.clone(),
                        needs_interop: Some(false),
                        exports_data: info.exports_data.clone(),
                        processing: None,
                    },
                );
            }

            Ok(BundleResult {
                metadata,
                handle: Box::new(DiskBundleHandle {
                    staging,
                    target: request.cache_dir,
                }),
            })
        })
    }
}

/// Staging directory next to the final cache dir.
fn staging_dir(cache_dir: &Path) -> PathBuf {
    let name = cache_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache".to_string());
    cache_dir.with_file_name(format!("{name}_temp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn staged(dir: &TempDir) -> (PathBuf, PathBuf) {
        let staging = dir.path().join("deps_temp");
        let target = dir.path().join("deps");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("react.js"), "export default {}").unwrap();
        (staging, target)
    }

    #[test]
    fn test_commit_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let (staging, target) = staged(&dir);

        let handle = Box::new(DiskBundleHandle {
            staging: staging.clone(),
            target: target.clone(),
        });
        handle.commit().unwrap();

        assert!(!staging.exists());
        assert!(target.join("react.js").exists());
    }

    #[test]
    fn test_commit_replaces_stale_target() {
        let dir = TempDir::new().unwrap();
        let (staging, target) = staged(&dir);
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.js"), "old").unwrap();

        let handle = Box::new(DiskBundleHandle {
            staging,
            target: target.clone(),
        });
        handle.commit().unwrap();

        assert!(target.join("react.js").exists());
        assert!(!target.join("stale.js").exists());
    }

    #[test]
    fn test_cancel_discards_staging() {
        let dir = TempDir::new().unwrap();
        let (staging, target) = staged(&dir);

        let handle = Box::new(DiskBundleHandle {
            staging: staging.clone(),
            target: target.clone(),
        });
        handle.cancel();

        assert!(!staging.exists());
        assert!(!target.exists());
    }

    fn copy_request(dir: &TempDir, src_code: &str) -> BundleRequest {
        let src = dir.path().join("node_modules/demo/index.js");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, src_code).unwrap();

        let cache_dir = dir.path().join("cache");
        let mut deps = FxHashMap::default();
        deps.insert(
            "demo".to_string(),
            DepInfo {
                id: "demo".to_string(),
                file: cache_dir.join("deps/demo.js"),
                src: Some(src),
                file_hash: None,
                browser_hash: "spec".to_string(),
                needs_interop: None,
                exports_data: None,
                processing: None,
            },
        );
        BundleRequest {
            deps,
            cache_dir,
            inputs_hash: "h1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_copy_bundler_stages_and_commits() {
        let dir = TempDir::new().unwrap();
        let request = copy_request(&dir, "export const demo = 1;");

        let result = CopyBundler.bundle(request.clone()).await.unwrap();
        let demo = result.metadata.optimized.get("demo").unwrap();
        assert!(demo.file_hash.is_some());
        assert_eq!(demo.file, request.cache_dir.join("deps/demo.js"));

        result.handle.commit().unwrap();
        let bundled = fs::read_to_string(request.cache_dir.join("deps/demo.js")).unwrap();
        assert_eq!(bundled, "export const demo = 1;");
    }

    #[tokio::test]
    async fn test_copy_bundler_hashes_stable_for_same_content() {
        let dir = TempDir::new().unwrap();
        let request = copy_request(&dir, "export const demo = 1;");

        let first = CopyBundler.bundle(request.clone()).await.unwrap();
        let second = CopyBundler.bundle(request.clone()).await.unwrap();

        assert_eq!(first.metadata.browser_hash, second.metadata.browser_hash);
        assert_eq!(
            first.metadata.optimized.get("demo").unwrap().file_hash,
            second.metadata.optimized.get("demo").unwrap().file_hash
        );
        second.handle.cancel();
        first.handle.cancel();
    }
}
