//! `[optimizer]` section configuration.
//!
//! Controls dependency pre-bundling: which entries are scanned, which bare
//! imports are force-included or excluded, and the timing knobs of the
//! discovery state machine.
//!
//! # Example
//!
//! ```toml
//! [optimizer]
//! strategy = "scan"
//! entries = ["index.html", "src/main.ts"]
//! include = ["lodash-es"]
//! exclude = ["@local/workspace-pkg"]
//! cache_dir = "node_modules/.strobe"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// When dependency discovery happens relative to serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    /// Scan entries and bundle before the first request is served.
    PreScan,
    /// Scan entries in the background while the server starts serving.
    Scan,
    /// Discover dependencies only as requests arrive.
    Lazy,
    /// Like `scan`, but also crawl dynamic imports during cold start.
    Eager,
}

impl DiscoveryStrategy {
    /// Whether this strategy scans entry files at startup.
    pub fn scans_entries(self) -> bool {
        !matches!(self, Self::Lazy)
    }

    /// Whether dynamic imports are followed during the startup scan.
    pub fn crawls_dynamic_imports(self) -> bool {
        matches!(self, Self::Eager)
    }
}

/// Dependency optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Discovery strategy.
    pub strategy: DiscoveryStrategy,

    /// Entry files scanned for bare imports (relative to project root).
    pub entries: Vec<PathBuf>,

    /// Bare specifiers always pre-bundled even if never discovered.
    pub include: Vec<String>,

    /// Bare specifiers never pre-bundled.
    pub exclude: Vec<String>,

    /// Cache directory for bundled artifacts and metadata.
    pub cache_dir: PathBuf,

    /// Debounce window after a missing-dep registration, in milliseconds.
    pub debounce_ms: u64,

    /// Quiet period required before the first run is armed, in milliseconds.
    pub idle_ms: u64,

    /// Watchdog: force the first run after this long with no requests at all.
    pub first_run_watchdog_ms: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            strategy: DiscoveryStrategy::Scan,
            entries: vec![PathBuf::from("index.html")],
            include: Vec::new(),
            exclude: Vec::new(),
            cache_dir: PathBuf::from("node_modules/.strobe"),
            debounce_ms: 100,
            idle_ms: 100,
            first_run_watchdog_ms: 100,
        }
    }
}
