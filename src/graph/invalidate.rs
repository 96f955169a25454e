//! Invalidation semantics.
//!
//! A file change (or HMR propagation) clears cached transform results and
//! walks importer edges. Soft invalidation keeps the prior result reusable
//! (only import timestamp queries need rewriting); hard invalidation forces a
//! full re-transform and sticks until the node is re-transformed.
//!
//! # Policy
//! - soft on a fresh node with a result: save the result for reuse
//! - soft on a fresh node without a result: treat as hard
//! - soft on an already-soft node: keep the saved result (idempotent)
//! - soft on a hard node: hard wins and sticks
//! - hard always: `HardInvalidated`
//!
//! Importers are invalidated recursively unless they explicitly accept the
//! module; an importer is soft-invalidated iff it statically imports the
//! module or the current invalidation was itself soft.

use rustc_hash::FxHashSet;
use std::path::Path;

use super::node::{InvalidationState, ModuleIdx};
use super::store::{GraphStore, ModuleGraph};
use crate::hmr::next_hmr_timestamp;

impl ModuleGraph {
    /// Invalidate one module and recursively its importers.
    ///
    /// `seen` guards against cycles: recursion stops when the node was
    /// already visited and its invalidation state did not change.
    pub fn invalidate_module(
        &self,
        module: ModuleIdx,
        seen: &mut FxHashSet<ModuleIdx>,
        timestamp: u64,
        is_hmr: bool,
        soft: bool,
    ) {
        let mut store = self.store.write();
        invalidate_inner(&mut store, self.indexes_etags, module, seen, timestamp, is_hmr, soft);
    }

    /// Hard-invalidate every node with a fresh seen set.
    pub fn invalidate_all(&self) {
        let timestamp = next_hmr_timestamp();
        let mut store = self.store.write();
        let mut seen = FxHashSet::default();
        let indices: Vec<ModuleIdx> = store.indices().collect();
        for idx in indices {
            invalidate_inner(&mut store, self.indexes_etags, idx, &mut seen, timestamp, false, false);
        }
    }

    /// Hard-invalidate every node registered for a file.
    pub fn on_file_change(&self, file: &Path) {
        let timestamp = next_hmr_timestamp();
        let mut store = self.store.write();
        let Some(modules) = store.file_to_modules.get(file).cloned() else {
            return;
        };
        let mut sorted: Vec<ModuleIdx> = modules.into_iter().collect();
        sorted.sort();
        let mut seen = FxHashSet::default();
        for idx in sorted {
            invalidate_inner(&mut store, self.indexes_etags, idx, &mut seen, timestamp, false, false);
        }
    }
}

fn invalidate_inner(
    store: &mut GraphStore,
    indexes_etags: bool,
    module: ModuleIdx,
    seen: &mut FxHashSet<ModuleIdx>,
    timestamp: u64,
    is_hmr: bool,
    soft: bool,
) {
    let dropped_etag;
    {
        let node = store.node_mut(module);
        let prev_state = node.invalidation.clone();

        // State transition runs before the seen check: a soft pass followed
        // by a hard pass over the same seen set must still upgrade the node.
        if soft {
            if node.invalidation.is_fresh() {
                node.invalidation = match node.transform_result.clone() {
                    Some(result) => InvalidationState::Soft(result),
                    None => InvalidationState::Hard,
                };
            }
            // Already soft: keep the saved result. Already hard: hard sticks.
        } else {
            node.invalidation = InvalidationState::Hard;
        }

        if seen.contains(&module) && prev_state == node.invalidation {
            return;
        }
        seen.insert(module);

        if is_hmr {
            node.last_hmr_timestamp = timestamp;
        } else {
            node.last_invalidation_timestamp = timestamp;
        }

        dropped_etag = node.transform_result.take().map(|r| r.etag);
    }

    if indexes_etags && let Some(etag) = dropped_etag {
        store.etag_to_module.remove(&etag);
    }

    let importers: Vec<ModuleIdx> = store.node(module).importers.iter().copied().collect();
    for importer in importers {
        if store.node(importer).accepted_hmr_deps.contains(&module) {
            continue;
        }
        let soft_importer = store.node(importer).static_imported.contains(&module) || soft;
        invalidate_inner(store, indexes_etags, importer, seen, timestamp, is_hmr, soft_importer);
    }
}
