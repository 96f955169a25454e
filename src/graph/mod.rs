//! Per-environment module graph.
//!
//! A directed graph of module nodes addressable by URL, resolved id, file
//! path, and cached-response etag. Owns soft/hard invalidation semantics.
//!
//! # Architecture
//!
//! ```text
//! transform pipeline --ensure_entry_from_url--> [resolve] --> [store]
//!                    --update_module_info-----> [update]      arena + indexes
//! watcher/propagator --invalidate/on_file_change--> [invalidate]
//! ```
//!
//! # Modules
//!
//! - `node` - arena node types (tri-state acceptance, invalidation variants)
//! - `store` - arena plus url/id/file/etag lookup tables
//! - `resolve` - single-flight URL resolution through the injected resolver
//! - `update` - transform-pipeline writes (edges, transform results)
//! - `invalidate` - soft/hard invalidation with importer propagation

mod invalidate;
mod node;
mod resolve;
mod store;
mod update;

pub use node::{InvalidationState, ModuleIdx, ModuleKind, ModuleNode, SelfAccepting, TransformResult};
pub use resolve::{GraphError, ModuleResolver, ResolveFuture, ResolvedId};
pub use store::{GraphStore, ModuleGraph};
pub use update::ModuleInfoUpdate;

#[cfg(test)]
pub(crate) use store::testing;
