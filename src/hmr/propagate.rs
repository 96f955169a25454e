//! Update propagation.
//!
//! Given a changed module, walk importer edges until every path ends at an
//! accept boundary, or report a dead end (which forces a full reload).
//!
//! Pure graph traversal: no payload construction, no invalidation. The store
//! is read-locked by the caller for the whole walk.

use rustc_hash::FxHashSet;

use crate::graph::{GraphStore, ModuleIdx};

/// A node at which an update can be applied without further propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    /// The module that accepts the update.
    pub boundary: ModuleIdx,
    /// The module whose update is being accepted.
    pub accepted_via: ModuleIdx,
    /// The boundary participates in an import cycle back into the update
    /// chain; clients reload instead of re-running stale accept callbacks.
    pub is_within_circular_import: bool,
}

/// Walk importers of `node`, collecting boundaries.
///
/// Returns `true` on a dead end: some import path has no accepting module,
/// so the whole update degrades to a full reload.
pub fn propagate_update(
    store: &GraphStore,
    node: ModuleIdx,
    traversed: &mut FxHashSet<ModuleIdx>,
    boundaries: &mut Vec<Boundary>,
    chain: &[ModuleIdx],
) -> bool {
    if !traversed.insert(node) {
        return false;
    }

    let module = store.node(node);

    // A resolved module that was never transformed has no acceptance data
    // yet; it is not loaded in any client, so there is nothing to update.
    // The next real fetch gets fresh code anyway.
    if module.id.is_some() && !module.self_accepting.is_known() {
        return false;
    }

    if module.self_accepting.accepts() {
        boundaries.push(Boundary {
            boundary: node,
            accepted_via: node,
            is_within_circular_import: is_node_within_circular_imports(
                store,
                node,
                chain,
                &mut vec![node],
                &mut FxHashSet::default(),
            ),
        });

        // PostCSS-style registrations make arbitrary files dependencies of
        // CSS; additionally walk importers that are CSS requests.
        for &importer in &module.importers {
            if store.node(importer).is_css() && !chain.contains(&importer) {
                let sub_chain: Vec<ModuleIdx> = chain.iter().copied().chain([importer]).collect();
                propagate_update(store, importer, traversed, boundaries, &sub_chain);
            }
        }
        return false;
    }

    if module.accepts_exports() {
        // Partial acceptance acts as a self-accepting boundary, but updates
        // still propagate to importers that use non-accepted exports.
        boundaries.push(Boundary {
            boundary: node,
            accepted_via: node,
            is_within_circular_import: is_node_within_circular_imports(
                store,
                node,
                chain,
                &mut vec![node],
                &mut FxHashSet::default(),
            ),
        });
    } else {
        if module.importers.is_empty() {
            return true;
        }

        // A non-CSS dep registered only by CSS files is a leaf the client
        // cannot hot-swap.
        if !module.is_css()
            && module
                .importers
                .iter()
                .all(|&importer| store.node(importer).is_css())
        {
            return true;
        }
    }

    for &importer in &module.importers {
        let sub_chain: Vec<ModuleIdx> = chain.iter().copied().chain([importer]).collect();

        if store.node(importer).accepted_hmr_deps.contains(&node) {
            boundaries.push(Boundary {
                boundary: importer,
                accepted_via: node,
                is_within_circular_import: is_node_within_circular_imports(
                    store,
                    importer,
                    &sub_chain,
                    &mut vec![importer],
                    &mut FxHashSet::default(),
                ),
            });
            continue;
        }

        // The importer consumes only accepted export names: the update stops
        // here for this edge.
        if let (Some(id), Some(accepted_exports)) = (&module.id, &module.accepted_hmr_exports)
            && let Some(bindings) = store.node(importer).imported_bindings.get(id)
            && bindings.iter().all(|b| accepted_exports.contains(b))
        {
            continue;
        }

        if !chain.contains(&importer)
            && propagate_update(store, importer, traversed, boundaries, &sub_chain)
        {
            return true;
        }
    }

    false
}

/// Secondary DFS along importer edges: does any ancestor of `node` appear in
/// the original update chain? CSS importers and self-edges are skipped.
fn is_node_within_circular_imports(
    store: &GraphStore,
    node: ModuleIdx,
    node_chain: &[ModuleIdx],
    current_chain: &mut Vec<ModuleIdx>,
    traversed: &mut FxHashSet<ModuleIdx>,
) -> bool {
    if !traversed.insert(node) {
        return false;
    }

    for &importer in &store.node(node).importers {
        if importer == node {
            continue;
        }
        if store.node(importer).is_css() {
            continue;
        }
        if node_chain.contains(&importer) {
            return true;
        }
        if !current_chain.contains(&importer) {
            current_chain.push(importer);
            let circular =
                is_node_within_circular_imports(store, importer, node_chain, current_chain, traversed);
            current_chain.pop();
            if circular {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{client_graph, entry};
    use crate::graph::{ModuleGraph, ModuleIdx, ModuleInfoUpdate, SelfAccepting};
    use rustc_hash::FxHashMap;
    use std::sync::Arc;

    /// Wire `importer -> imported` edges and mark every node as transformed
    /// (self_accepting known) so propagation does not early-out.
    async fn link(graph: &Arc<ModuleGraph>, importer: &str, imported: &[&str]) -> ModuleIdx {
        let idx = entry(graph, importer).await;
        let update = ModuleInfoUpdate {
            imported: imported.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        graph.update_module_info(idx, update).await.unwrap();
        idx
    }

    async fn set_self_accepting(graph: &Arc<ModuleGraph>, idx: ModuleIdx, value: SelfAccepting) {
        let update = ModuleInfoUpdate {
            is_self_accepting: matches!(value, SelfAccepting::Accepts),
            ..Default::default()
        };
        graph.update_module_info(idx, update).await.unwrap();
    }

    fn run_propagate(graph: &Arc<ModuleGraph>, node: ModuleIdx) -> (bool, Vec<Boundary>) {
        let mut traversed = FxHashSet::default();
        let mut boundaries = Vec::new();
        let dead_end = graph.read(|store| {
            propagate_update(store, node, &mut traversed, &mut boundaries, &[node])
        });
        (dead_end, boundaries)
    }

    #[tokio::test]
    async fn test_self_accepting_leaf() {
        let graph = client_graph();
        // B imports A; A self-accepts.
        let a = link(&graph, "/a.js", &[]).await;
        let _b = link(&graph, "/b.js", &["/a.js"]).await;
        set_self_accepting(&graph, a, SelfAccepting::Accepts).await;

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(!dead_end);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].boundary, a);
        assert_eq!(boundaries[0].accepted_via, a);
        assert!(!boundaries[0].is_within_circular_import);
    }

    #[tokio::test]
    async fn test_boundary_at_importer() {
        let graph = client_graph();
        let a = link(&graph, "/a.js", &[]).await;
        let b = entry(&graph, "/b.js").await;
        let update = ModuleInfoUpdate {
            imported: vec!["/a.js".to_string()],
            accepted: vec!["/a.js".to_string()],
            ..Default::default()
        };
        graph.update_module_info(b, update).await.unwrap();
        // A went through the pipeline and declines self-updates.
        set_self_accepting(&graph, a, SelfAccepting::Declines).await;

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(!dead_end);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].boundary, b);
        assert_eq!(boundaries[0].accepted_via, a);
    }

    #[tokio::test]
    async fn test_dead_end() {
        let graph = client_graph();
        let a = link(&graph, "/a.js", &[]).await;
        let _b = link(&graph, "/b.js", &["/a.js"]).await;
        set_self_accepting(&graph, a, SelfAccepting::Declines).await;

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(dead_end);
        assert!(boundaries.is_empty());
    }

    #[tokio::test]
    async fn test_never_loaded_module_stops_propagation() {
        let graph = client_graph();
        // A resolved but never transformed: self_accepting stays Unknown.
        let a = entry(&graph, "/a.js").await;

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(!dead_end);
        assert!(boundaries.is_empty());
    }

    #[tokio::test]
    async fn test_circular_import_flagged() {
        let graph = client_graph();
        // A -> B -> C -> A; A self-accepts; change B.
        let a = link(&graph, "/a.js", &["/b.js"]).await;
        let b = link(&graph, "/b.js", &["/c.js"]).await;
        let _c = link(&graph, "/c.js", &["/a.js"]).await;
        let update = ModuleInfoUpdate {
            imported: vec!["/b.js".to_string()],
            is_self_accepting: true,
            ..Default::default()
        };
        graph.update_module_info(a, update).await.unwrap();

        let (dead_end, boundaries) = run_propagate(&graph, b);
        assert!(!dead_end);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].boundary, a);
        assert!(boundaries[0].is_within_circular_import);
    }

    #[tokio::test]
    async fn test_partial_export_acceptance_stops() {
        let graph = client_graph();
        // A exports x, y and accepts {x}; B imports only {x} from A.
        let a = link(&graph, "/a.js", &[]).await;
        let mut exports = FxHashSet::default();
        exports.insert("x".to_string());
        let update = ModuleInfoUpdate {
            accepted_exports: Some(exports),
            ..Default::default()
        };
        graph.update_module_info(a, update).await.unwrap();

        let b = entry(&graph, "/b.js").await;
        let mut bindings = FxHashMap::default();
        bindings.insert("/a.js".to_string(), {
            let mut set = FxHashSet::default();
            set.insert("x".to_string());
            set
        });
        let update = ModuleInfoUpdate {
            imported: vec!["/a.js".to_string()],
            imported_bindings: bindings,
            ..Default::default()
        };
        graph.update_module_info(b, update).await.unwrap();

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(!dead_end);
        // Update stops at A; B consumes only accepted names.
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].boundary, a);
    }

    #[tokio::test]
    async fn test_partial_export_acceptance_continues_on_unaccepted_binding() {
        let graph = client_graph();
        let a = link(&graph, "/a.js", &[]).await;
        let mut exports = FxHashSet::default();
        exports.insert("x".to_string());
        let update = ModuleInfoUpdate {
            accepted_exports: Some(exports),
            ..Default::default()
        };
        graph.update_module_info(a, update).await.unwrap();

        // B imports {x, z}: z is not accepted, so propagation continues into
        // B, which has no importers -> dead end.
        let b = entry(&graph, "/b.js").await;
        let mut bindings = FxHashMap::default();
        bindings.insert("/a.js".to_string(), {
            let mut set = FxHashSet::default();
            set.insert("x".to_string());
            set.insert("z".to_string());
            set
        });
        let update = ModuleInfoUpdate {
            imported: vec!["/a.js".to_string()],
            imported_bindings: bindings,
            ..Default::default()
        };
        graph.update_module_info(b, update).await.unwrap();

        let (dead_end, boundaries) = run_propagate(&graph, a);
        assert!(dead_end);
        // The partial boundary at A was still collected before the dead end.
        assert_eq!(boundaries.len(), 1);
    }

    #[tokio::test]
    async fn test_css_only_importers_dead_end() {
        let graph = client_graph();
        // A non-CSS dep imported only by a stylesheet.
        let dep = link(&graph, "/mixin.js", &[]).await;
        let _css = link(&graph, "/style.css", &["/mixin.js"]).await;
        set_self_accepting(&graph, dep, SelfAccepting::Declines).await;

        let (dead_end, _) = run_propagate(&graph, dep);
        assert!(dead_end);
    }

    #[tokio::test]
    async fn test_propagation_terminates_on_cycle() {
        let graph = client_graph();
        let a = link(&graph, "/a.js", &["/b.js"]).await;
        let _b = link(&graph, "/b.js", &["/a.js"]).await;
        set_self_accepting(&graph, a, SelfAccepting::Declines).await;

        let mut traversed = FxHashSet::default();
        let mut boundaries = Vec::new();
        graph.read(|store| {
            propagate_update(store, a, &mut traversed, &mut boundaries, &[a]);
        });
        assert!(traversed.len() <= graph.len());
    }
}
