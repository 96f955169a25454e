//! Indexed node storage.
//!
//! One `GraphStore` per environment: an arena of nodes plus the four lookup
//! tables (url, id, file, etag). All writes happen inside short synchronous
//! regions behind the graph's lock; async work (resolution) never holds it.
//!
//! # Invariants
//! - `url_to_module[url].url == url` and `id_to_module[id].id == Some(id)`
//! - For every edge `a -> b`: `a ∈ b.importers` iff `b ∈ a.imported_modules`
//! - `file_to_modules[f]` contains every node ever registered with file `f`
//! - At most one node per resolved id

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::node::{ModuleIdx, ModuleNode};
use super::resolve::{ModuleResolver, PendingMap};
use crate::utils::url::{FS_PREFIX, file_from_id};

/// Arena plus lookup tables. Interior of [`ModuleGraph`].
#[derive(Debug, Default)]
pub struct GraphStore {
    pub(super) nodes: Vec<ModuleNode>,
    pub(super) url_to_module: FxHashMap<String, ModuleIdx>,
    pub(super) id_to_module: FxHashMap<String, ModuleIdx>,
    pub(super) file_to_modules: FxHashMap<PathBuf, FxHashSet<ModuleIdx>>,
    pub(super) etag_to_module: FxHashMap<String, ModuleIdx>,
}

impl GraphStore {
    #[inline]
    pub fn node(&self, idx: ModuleIdx) -> &ModuleNode {
        &self.nodes[idx.index()]
    }

    #[inline]
    pub(super) fn node_mut(&mut self, idx: ModuleIdx) -> &mut ModuleNode {
        &mut self.nodes[idx.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node indices (stable iteration order).
    pub fn indices(&self) -> impl Iterator<Item = ModuleIdx> + use<> {
        (0..self.nodes.len() as u32).map(ModuleIdx)
    }

    /// Register a node for a resolved id, or alias the url onto an existing
    /// node with the same id.
    pub(super) fn register_resolved(
        &mut self,
        url: String,
        id: String,
        meta: Option<serde_json::Value>,
    ) -> ModuleIdx {
        if let Some(&idx) = self.id_to_module.get(&id) {
            // Another url resolved to the same id: register the alias.
            self.url_to_module.insert(url, idx);
            return idx;
        }

        let file = file_from_id(&id);
        let idx = ModuleIdx(self.nodes.len() as u32);
        let mut node = ModuleNode::new(url.clone(), Some(id.clone()), file.clone());
        node.meta = meta;
        self.nodes.push(node);
        self.url_to_module.insert(url, idx);
        self.id_to_module.insert(id, idx);
        self.file_to_modules.entry(file).or_default().insert(idx);
        idx
    }

    /// Register a synthetic node reachable only by file path.
    pub(super) fn register_file_only(&mut self, file: PathBuf) -> ModuleIdx {
        let url = format!("{FS_PREFIX}{}", file.display());

        // Dedupe against existing nodes of this file.
        if let Some(existing) = self.file_to_modules.get(&file) {
            for &idx in existing {
                let node = self.node(idx);
                if node.url == url || node.id.as_deref() == Some(url.as_str()) {
                    return idx;
                }
            }
        }

        let idx = ModuleIdx(self.nodes.len() as u32);
        self.nodes.push(ModuleNode::new(url.clone(), None, file.clone()));
        self.url_to_module.insert(url, idx);
        self.file_to_modules.entry(file).or_default().insert(idx);
        idx
    }
}

/// Per-environment module graph.
///
/// Lookups and mutations are synchronous; only `ensure_entry_from_url` (and
/// the operations built on it) await the injected resolver.
pub struct ModuleGraph {
    pub(super) store: RwLock<GraphStore>,
    /// In-flight resolutions keyed by cleaned raw url (single-flight).
    pub(super) pending: PendingMap,
    pub(super) resolver: Arc<dyn ModuleResolver>,
    /// Only the client environment maintains the etag index.
    pub(super) indexes_etags: bool,
}

impl ModuleGraph {
    pub fn new(resolver: Arc<dyn ModuleResolver>, indexes_etags: bool) -> Arc<Self> {
        Arc::new(Self {
            store: RwLock::new(GraphStore::default()),
            pending: PendingMap::default(),
            resolver,
            indexes_etags,
        })
    }

    /// Run a closure with read access to the store.
    pub fn read<R>(&self, f: impl FnOnce(&GraphStore) -> R) -> R {
        f(&self.store.read())
    }

    /// Pure lookup by resolved id.
    pub fn module_by_id(&self, id: &str) -> Option<ModuleIdx> {
        self.store.read().id_to_module.get(id).copied()
    }

    /// Pure lookup by file path. Returns all nodes sharing the file.
    pub fn modules_by_file(&self, file: &Path) -> Vec<ModuleIdx> {
        self.store
            .read()
            .file_to_modules
            .get(file)
            .map(|set| {
                let mut v: Vec<_> = set.iter().copied().collect();
                v.sort();
                v
            })
            .unwrap_or_default()
    }

    /// Pure lookup by cached-response etag (client environment only).
    pub fn module_by_etag(&self, etag: &str) -> Option<ModuleIdx> {
        self.store.read().etag_to_module.get(etag).copied()
    }

    /// Snapshot of a node's data.
    pub fn node(&self, idx: ModuleIdx) -> ModuleNode {
        self.store.read().node(idx).clone()
    }

    /// Node count.
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// Create a synthetic node reachable only by file (URL `/@fs/<file>`),
    /// for imported assets without their own request URL (e.g. CSS `@import`
    /// children registered as dependencies).
    pub fn create_file_only_entry(&self, file: impl Into<PathBuf>) -> ModuleIdx {
        self.store.write().register_file_only(file.into())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_file_only_entry_dedupe() {
        let graph = client_graph();
        let a = graph.create_file_only_entry("/src/dep.png");
        let b = graph.create_file_only_entry("/src/dep.png");
        assert_eq!(a, b);

        let node = graph.node(a);
        assert_eq!(node.url, "/@fs//src/dep.png");
        assert!(node.id.is_none());
    }

    #[tokio::test]
    async fn test_file_only_entry_indexed_by_file() {
        let graph = client_graph();
        let idx = graph.create_file_only_entry("/src/icon.svg");
        assert_eq!(graph.modules_by_file(Path::new("/src/icon.svg")), vec![idx]);
    }

    #[tokio::test]
    async fn test_same_cleaned_url_shares_node() {
        let graph = client_graph();
        let a = entry(&graph, "/src/app.js?t=100").await;
        let b = entry(&graph, "/src/app.js?t=999").await;
        assert_eq!(a, b);
        assert_eq!(graph.len(), 1);
    }
}
