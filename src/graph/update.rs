//! Transform-pipeline writes into the graph.
//!
//! After transforming a module, the pipeline reports what the module imports,
//! what it accepts updates from, and its cached transform output. Edge updates
//! keep importer/imported sets symmetric and report modules that lost their
//! last importer (candidates for pruning).

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use super::node::{InvalidationState, ModuleIdx, SelfAccepting, TransformResult};
use super::resolve::GraphError;
use super::store::ModuleGraph;
use crate::utils::url::strip_hmr_queries;

/// Everything the transform pipeline learned about one module.
#[derive(Debug, Default)]
pub struct ModuleInfoUpdate {
    /// Imported URLs, in source order.
    pub imported: Vec<String>,
    /// Subset of `imported` that is statically imported in code.
    pub static_imported: FxHashSet<String>,
    /// URLs this module explicitly accepts updates from.
    pub accepted: Vec<String>,
    /// Export names this module partially accepts (`None` if none).
    pub accepted_exports: Option<FxHashSet<String>>,
    /// importee id -> binding names consumed from it.
    pub imported_bindings: FxHashMap<String, FxHashSet<String>>,
    /// Whether the module self-accepts.
    pub is_self_accepting: bool,
}

impl ModuleGraph {
    /// Replace a module's edge sets and acceptance metadata.
    ///
    /// URL entries are resolved through `ensure_entry_from_url` concurrently,
    /// preserving input order. Returns the set of previously imported modules
    /// that no longer have any importer, or `None` when every previous import
    /// is still referenced.
    pub async fn update_module_info(
        self: &Arc<Self>,
        module: ModuleIdx,
        update: ModuleInfoUpdate,
    ) -> Result<Option<FxHashSet<ModuleIdx>>, GraphError> {
        let imported_count = update.imported.len();
        let total = imported_count + update.accepted.len();

        // Resolve imported + accepted urls concurrently; slot results by
        // input position so order is deterministic.
        let mut tasks = tokio::task::JoinSet::new();
        for (i, url) in update
            .imported
            .iter()
            .chain(update.accepted.iter())
            .cloned()
            .enumerate()
        {
            let graph = Arc::clone(self);
            tasks.spawn(async move { (i, graph.ensure_entry_from_url(&url).await) });
        }

        let mut resolved: Vec<Option<ModuleIdx>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let Ok((i, result)) = joined else { continue };
            resolved[i] = Some(result?);
        }

        let static_urls: FxHashSet<String> = update
            .static_imported
            .iter()
            .map(|u| strip_hmr_queries(u))
            .collect();

        let mut store = self.store.write();

        let new_imported: FxHashSet<ModuleIdx> =
            resolved[..imported_count].iter().flatten().copied().collect();
        let static_imported: FxHashSet<ModuleIdx> = update
            .imported
            .iter()
            .zip(&resolved[..imported_count])
            .filter(|(url, _)| static_urls.contains(&strip_hmr_queries(url)))
            .filter_map(|(_, idx)| *idx)
            .collect();
        let accepted_deps: FxHashSet<ModuleIdx> =
            resolved[imported_count..].iter().flatten().copied().collect();

        // Forward edges gained.
        for &dep in &new_imported {
            store.node_mut(dep).importers.insert(module);
        }

        // Forward edges lost: drop the back edge; collect orphans.
        let prev_imported = std::mem::take(&mut store.node_mut(module).imported_modules);
        let mut no_longer_imported = FxHashSet::default();
        for &old in &prev_imported {
            if new_imported.contains(&old) {
                continue;
            }
            let dep = store.node_mut(old);
            dep.importers.remove(&module);
            if dep.importers.is_empty() {
                no_longer_imported.insert(old);
            }
        }

        let node = store.node_mut(module);
        node.imported_modules = new_imported;
        node.static_imported = static_imported;
        node.accepted_hmr_deps = accepted_deps;
        node.accepted_hmr_exports = update.accepted_exports;
        node.imported_bindings = update.imported_bindings;
        node.self_accepting = if update.is_self_accepting {
            SelfAccepting::Accepts
        } else {
            SelfAccepting::Declines
        };

        Ok((!no_longer_imported.is_empty()).then_some(no_longer_imported))
    }

    /// Cache (or clear) a module's transform result.
    ///
    /// Maintains the etag index on the client environment and clears any
    /// pending invalidation state: a node holding a fresh result is valid.
    pub fn update_module_transform_result(
        &self,
        module: ModuleIdx,
        result: Option<TransformResult>,
    ) {
        let mut store = self.store.write();

        if self.indexes_etags {
            if let Some(prev_etag) = store.node(module).transform_result.as_ref().map(|r| r.etag.clone()) {
                store.etag_to_module.remove(&prev_etag);
            }
            if let Some(result) = &result {
                store.etag_to_module.insert(result.etag.clone(), module);
            }
        }

        let node = store.node_mut(module);
        node.transform_result = result;
        node.invalidation = InvalidationState::Fresh;
    }
}
