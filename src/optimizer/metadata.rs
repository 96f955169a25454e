//! Optimizer metadata.
//!
//! One [`DepMetadata`] instance per environment tracks the three dependency
//! categories:
//!
//! - `optimized` - deps present in the last committed bundle
//! - `chunks` - shared sub-chunks the bundler emitted
//! - `discovered` - deps registered since, waiting for the next batch
//!
//! Keys are disjoint across the three maps at any moment. The `browser_hash`
//! is appended to optimized-dep URLs as `?v=` and only changes when the
//! bundled artifacts change in a way that requires a reload.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::batch::BatchHandle;
use crate::config::OptimizerConfig;
use crate::utils::hash::{StableHasher, short_hash};
use crate::utils::url::with_version_query;

/// Lockfiles probed (in order) for the optimizer input hash.
const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
];

/// Shape of a pre-bundled dep's exports, inferred by the bundler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportsData {
    /// Whether the source uses ESM syntax.
    pub has_module_syntax: bool,
    /// Named exports.
    pub exports: Vec<String>,
}

/// One tracked dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepInfo {
    /// Bare specifier (e.g. `lodash-es`, `react/jsx-runtime`).
    pub id: String,
    /// Bundled artifact path inside the cache dir.
    pub file: PathBuf,
    /// Resolved source entry, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<PathBuf>,
    /// Content hash of the emitted artifact. `None` until bundled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// `?v=` component of this dep's URLs.
    pub browser_hash: String,
    /// Whether CJS interop wrapping is required. `None` until inferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_interop: Option<bool>,
    /// Export shape, when analyzed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exports_data: Option<ExportsData>,
    /// Resolves when the batch containing this dep commits. Not persisted.
    #[serde(skip)]
    pub processing: Option<BatchHandle>,
}

impl DepInfo {
    /// Public URL for this dep: `<fileRelativeToRoot>?v=<browserHash>`.
    pub fn url(&self, root: &Path) -> String {
        let rel = self.file.strip_prefix(root).unwrap_or(&self.file);
        let path = format!("/{}", rel.display());
        with_version_query(&path, &self.browser_hash)
    }
}

/// Per-environment optimizer metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepMetadata {
    /// Content hash of the optimizer inputs (lockfile + config).
    pub hash: String,
    /// Hash appended as `?v=` to optimized-dep URLs.
    pub browser_hash: String,
    /// Deps present in the last committed bundle.
    pub optimized: FxHashMap<String, DepInfo>,
    /// Shared sub-chunks produced by the bundler.
    pub chunks: FxHashMap<String, DepInfo>,
    /// Deps registered since the last snapshot. Not persisted.
    #[serde(skip)]
    pub discovered: FxHashMap<String, DepInfo>,
}

impl DepMetadata {
    pub fn new(hash: String) -> Self {
        let browser_hash = short_hash(&hash);
        Self {
            hash,
            browser_hash,
            optimized: FxHashMap::default(),
            chunks: FxHashMap::default(),
            discovered: FxHashMap::default(),
        }
    }

    /// Look a dep up across all three categories.
    pub fn get(&self, id: &str) -> Option<&DepInfo> {
        self.optimized
            .get(id)
            .or_else(|| self.chunks.get(id))
            .or_else(|| self.discovered.get(id))
    }

    /// Whether the dep is tracked in any category.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Whether a request's `?v=` still matches the tracked dep.
    ///
    /// A stale hash means the browser holds a URL from a superseded bundle
    /// (expected during warmup, while reloads are in flight).
    pub fn is_current(&self, id: &str, browser_hash: &str) -> bool {
        self.get(id).is_some_and(|dep| dep.browser_hash == browser_hash)
    }
}

/// Flatten a bare specifier into a safe artifact file name.
///
/// `react/jsx-runtime` -> `react_jsx-runtime`.
pub fn flatten_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '@' | '?' | '#' | '*' => '_',
            c => c,
        })
        .collect()
}

/// Content hash of the optimizer inputs: the first lockfile found at the
/// project root plus the parts of the config that affect bundling output.
pub fn compute_inputs_hash(root: &Path, config: &OptimizerConfig) -> String {
    let mut hasher = StableHasher::new();

    for name in LOCKFILES {
        let path = root.join(name);
        if let Ok(contents) = std::fs::read(&path) {
            hasher = hasher.update_str(name).update(&contents);
            break;
        }
    }

    // Include/exclude lists change what ends up in the bundle.
    let config_repr = serde_json::json!({
        "include": config.include,
        "exclude": config.exclude,
        "strategy": config.strategy,
    });
    hasher = hasher.update_str(&config_repr.to_string());

    hasher.finish_short()
}

/// Speculative browser hash for a dep registered mid-flight:
/// `h(hash ‖ known deps ‖ missing deps ‖ session)`.
///
/// The real hash is only known after bundling; the speculative one keys the
/// URLs handed out while the batch is still pending.
pub fn speculative_browser_hash(
    hash: &str,
    metadata: &DepMetadata,
    missing: &[&str],
    session: u64,
) -> String {
    let mut known: Vec<&str> = metadata
        .optimized
        .keys()
        .chain(metadata.discovered.keys())
        .map(String::as_str)
        .collect();
    known.sort_unstable();

    let mut hasher = StableHasher::new().update_str(hash);
    for id in known {
        hasher = hasher.update_str(id);
    }
    for id in missing {
        hasher = hasher.update_str(id);
    }
    hasher.update_u64(session).finish_short()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str) -> DepInfo {
        DepInfo {
            id: id.to_string(),
            file: PathBuf::from(format!("/root/node_modules/.strobe/deps/{}.js", flatten_id(id))),
            src: None,
            file_hash: None,
            browser_hash: "aaaaaaaa".to_string(),
            needs_interop: None,
            exports_data: None,
            processing: None,
        }
    }

    #[test]
    fn test_categories_disjoint_lookup() {
        let mut meta = DepMetadata::new("h1".to_string());
        meta.optimized.insert("react".to_string(), info("react"));
        meta.discovered.insert("lodash".to_string(), info("lodash"));

        assert!(meta.contains("react"));
        assert!(meta.contains("lodash"));
        assert!(!meta.contains("vue"));
    }

    #[test]
    fn test_is_current_browser_hash() {
        let mut meta = DepMetadata::new("h1".to_string());
        meta.optimized.insert("react".to_string(), info("react"));

        assert!(meta.is_current("react", "aaaaaaaa"));
        assert!(!meta.is_current("react", "stale000"));
        assert!(!meta.is_current("vue", "aaaaaaaa"));
    }

    #[test]
    fn test_flatten_id() {
        assert_eq!(flatten_id("react"), "react");
        assert_eq!(flatten_id("react/jsx-runtime"), "react_jsx-runtime");
        assert_eq!(flatten_id("@scope/pkg"), "_scope_pkg");
    }

    #[test]
    fn test_dep_url_format() {
        let dep = info("react");
        let url = dep.url(Path::new("/root"));
        assert_eq!(url, "/node_modules/.strobe/deps/react.js?v=aaaaaaaa");
    }

    #[test]
    fn test_inputs_hash_changes_with_lockfile() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = OptimizerConfig::default();

        let h1 = compute_inputs_hash(dir.path(), &config);
        std::fs::write(dir.path().join("package-lock.json"), "{\"v\":1}").unwrap();
        let h2 = compute_inputs_hash(dir.path(), &config);
        std::fs::write(dir.path().join("package-lock.json"), "{\"v\":2}").unwrap();
        let h3 = compute_inputs_hash(dir.path(), &config);

        assert_ne!(h1, h2);
        assert_ne!(h2, h3);
    }

    #[test]
    fn test_inputs_hash_changes_with_include_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = OptimizerConfig::default();
        let h1 = compute_inputs_hash(dir.path(), &config);
        config.include.push("lodash-es".to_string());
        let h2 = compute_inputs_hash(dir.path(), &config);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_speculative_browser_hash_varies_with_missing() {
        let meta = DepMetadata::new("h1".to_string());
        let a = speculative_browser_hash("h1", &meta, &["react"], 1);
        let b = speculative_browser_hash("h1", &meta, &["react", "vue"], 1);
        let c = speculative_browser_hash("h1", &meta, &["react"], 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_metadata_serde_skips_discovered() {
        let mut meta = DepMetadata::new("h1".to_string());
        meta.optimized.insert("react".to_string(), info("react"));
        meta.discovered.insert("lodash".to_string(), info("lodash"));

        let json = serde_json::to_string(&meta).unwrap();
        let parsed: DepMetadata = serde_json::from_str(&json).unwrap();

        assert!(parsed.optimized.contains_key("react"));
        assert!(parsed.discovered.is_empty());
    }
}
