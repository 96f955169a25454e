//! `strobe optimize` - force a pre-bundling pass from the command line.

use std::sync::Arc;

use anyhow::Result;

use crate::config::StrobeConfig;
use crate::log;
use crate::optimizer::{CopyBundler, DepsOptimizer, store};

/// Scan entries, bundle every discovered dep, and print a summary.
pub fn run(config: Arc<StrobeConfig>, force: bool) -> Result<()> {
    let cache_dir = config.cache_dir();
    if force {
        store::clear_cache(&cache_dir)?;
        log!("optimize"; "cleared cache at {}", cache_dir.display());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let optimizer = DepsOptimizer::new(
            config.optimizer.clone(),
            config.root.clone(),
            cache_dir.clone(),
            Arc::new(CopyBundler),
        );

        // One-shot: scan synchronously regardless of the configured
        // strategy, then run a single batch.
        optimizer.gate().mark_ready();
        optimizer.scan_and_register().await;
        optimizer.run_batch().await;

        let metadata = optimizer.metadata_snapshot();
        log!(
            "optimize";
            "bundled {} deps ({} chunks), hash {}",
            metadata.optimized.len(),
            metadata.chunks.len(),
            metadata.hash
        );
        for (rel, hash) in store::hash_artifacts(&cache_dir) {
            log!("optimize"; "  {} {}", hash, rel.display());
        }
        Ok(())
    })
}
