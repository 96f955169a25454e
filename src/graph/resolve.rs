//! URL resolution into graph entries.
//!
//! `ensure_entry_from_url` is the only way resolved nodes enter the graph.
//! Concurrent callers with the same raw url are deduplicated: the first caller
//! publishes an in-flight slot before awaiting the resolver, later callers
//! subscribe to that slot, and the resolver runs at most once per url.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::watch;

use super::node::ModuleIdx;
use super::store::ModuleGraph;
use crate::utils::url::strip_hmr_queries;

/// Outcome of the injected resolver.
#[derive(Debug, Clone)]
pub struct ResolvedId {
    /// Resolved identifier (path + query), unique within the environment.
    pub id: String,
    /// Opaque plugin metadata carried onto the node.
    pub meta: Option<serde_json::Value>,
}

/// Future type returned by [`ModuleResolver::resolve_id`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Option<ResolvedId>> + Send + 'a>>;

/// Resolver contract injected into the module graph.
///
/// May await (plugin pipelines, fs probing). `None` means the url cannot be
/// resolved and surfaces as [`GraphError::Resolve`].
pub trait ModuleResolver: Send + Sync {
    fn resolve_id<'a>(&'a self, url: &'a str) -> ResolveFuture<'a>;
}

/// Module graph errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// The resolver returned nothing for this url.
    #[error("failed to resolve module '{url}'")]
    Resolve { url: String },
}

type PendingResult = Option<Result<ModuleIdx, GraphError>>;

/// In-flight resolutions keyed by cleaned raw url.
///
/// Each slot is a `watch` channel: followers subscribe under the lock, so a
/// publish can never be missed between the lookup and the await.
#[derive(Default)]
pub struct PendingMap {
    slots: Mutex<FxHashMap<String, watch::Sender<PendingResult>>>,
}

impl ModuleGraph {
    /// Ensure a graph entry exists for a raw request url.
    ///
    /// Strips HMR (`?t=`) and import queries, then consults the url index. On
    /// miss, resolves via the injected resolver: if a node with the resolved
    /// id already exists the url is registered as an alias, otherwise a new
    /// node is created and inserted into all indexes.
    pub async fn ensure_entry_from_url(&self, raw_url: &str) -> Result<ModuleIdx, GraphError> {
        let url = strip_hmr_queries(raw_url);

        loop {
            let mut rx = {
                // Lock order here and below: pending before store.
                let mut slots = self.pending.slots.lock();
                if let Some(&idx) = self.store.read().url_to_module.get(&url) {
                    return Ok(idx);
                }
                match slots.get(&url) {
                    Some(tx) => tx.subscribe(),
                    None => {
                        let (tx, _rx) = watch::channel(None);
                        slots.insert(url.clone(), tx);
                        break;
                    }
                }
            };

            // Follower: wait for the leader to publish.
            loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // Leader vanished without publishing; retry from scratch.
                    break;
                }
            }
        }

        // Leader: resolve outside any lock.
        let resolved = self.resolver.resolve_id(&url).await;

        let mut slots = self.pending.slots.lock();
        let result = match resolved {
            Some(r) => Ok(self.store.write().register_resolved(url.clone(), r.id, r.meta)),
            None => Err(GraphError::Resolve { url: url.clone() }),
        };
        if let Some(tx) = slots.remove(&url) {
            let _ = tx.send(Some(result.clone()));
        }
        result
    }

    /// Lookup by url. Strips HMR and import queries and joins any in-flight
    /// resolution for the same url; never triggers a new resolution.
    pub async fn module_by_url(&self, raw_url: &str) -> Option<ModuleIdx> {
        let url = strip_hmr_queries(raw_url);

        let mut rx = {
            let slots = self.pending.slots.lock();
            if let Some(&idx) = self.store.read().url_to_module.get(&url) {
                return Some(idx);
            }
            slots.get(&url)?.subscribe()
        };

        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result.ok();
            }
            rx.changed().await.ok()?;
        }
    }
}
