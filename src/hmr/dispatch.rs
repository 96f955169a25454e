//! Update dispatch.
//!
//! Turns the boundaries collected by propagation into `update` payloads, or a
//! single `full-reload` when any propagation path dead-ends. The changed
//! modules are hard-invalidated (HMR-stamped) as part of the same pass.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::channel::ChannelBroadcaster;
use super::message::{HmrPayload, Update, UpdateKind};
use super::propagate::propagate_update;
use crate::graph::{GraphStore, ModuleGraph, ModuleIdx, ModuleKind};
use crate::utils::url::{is_explicit_import_required, normalize_hmr_url};
use crate::{debug, log};

/// What a dispatch pass produced (for logging and tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No boundary and no dead end: nothing loaded cares.
    NoUpdate,
    /// Fine-grained updates were sent.
    Updates(usize),
    /// A dead end forced a full reload.
    FullReload,
}

/// Propagate a file change through `modules` and emit one payload.
///
/// Boundary collection order follows the input module order, then DFS
/// importer order. Every changed module is hard-invalidated with the HMR
/// timestamp before its updates are materialized, so the `ssr_invalidates`
/// walk sees the stamps of the current pass.
pub fn update_modules(
    graph: &Arc<ModuleGraph>,
    channel: &ChannelBroadcaster,
    file: &str,
    modules: &[ModuleIdx],
    timestamp: u64,
) -> UpdateOutcome {
    let mut needs_reload = false;
    let mut traversed = FxHashSet::default();
    let mut invalidated = FxHashSet::default();
    let mut updates: Vec<Update> = Vec::new();

    for &module in modules {
        let mut boundaries = Vec::new();
        let dead_end = graph.read(|store| {
            propagate_update(store, module, &mut traversed, &mut boundaries, &[module])
        });

        graph.invalidate_module(module, &mut invalidated, timestamp, true, false);

        if needs_reload {
            continue;
        }
        if dead_end {
            needs_reload = true;
            continue;
        }

        graph.read(|store| {
            for b in &boundaries {
                let boundary = store.node(b.boundary);
                let accepted = store.node(b.accepted_via);
                updates.push(Update {
                    kind: match boundary.kind {
                        ModuleKind::Js => UpdateKind::JsUpdate,
                        ModuleKind::Css => UpdateKind::CssUpdate,
                    },
                    path: normalize_hmr_url(&boundary.url),
                    accepted_path: normalize_hmr_url(&accepted.url),
                    timestamp,
                    explicit_import_required: boundary.kind == ModuleKind::Js
                        && is_explicit_import_required(&accepted.url),
                    is_within_circular_import: b.is_within_circular_import,
                    ssr_invalidates: collect_ssr_invalidates(store, b.accepted_via, timestamp),
                });
            }
        });
    }

    if needs_reload {
        log!("hmr"; "full reload, triggered by {}", file);
        channel.send(&HmrPayload::full_reload(file));
        return UpdateOutcome::FullReload;
    }

    if updates.is_empty() {
        debug!("hmr"; "no update happened for {}", file);
        return UpdateOutcome::NoUpdate;
    }

    let count = updates.len();
    for update in &updates {
        debug!("hmr"; "update {} (via {})", update.path, update.accepted_path);
    }
    channel.send(&HmrPayload::Update { updates });
    UpdateOutcome::Updates(count)
}

/// Modules reachable from `from` along import edges that were invalidated
/// during the current pass (their timestamp matches), by URL.
fn collect_ssr_invalidates(store: &GraphStore, from: ModuleIdx, timestamp: u64) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut stack = vec![from];
    let mut urls = Vec::new();
    seen.insert(from);

    while let Some(idx) = stack.pop() {
        for &dep in &store.node(idx).imported_modules {
            if !seen.insert(dep) {
                continue;
            }
            let node = store.node(dep);
            if node.last_hmr_timestamp == timestamp || node.last_invalidation_timestamp == timestamp
            {
                urls.push(node.url.clone());
            }
            stack.push(dep);
        }
    }

    urls.sort();
    urls
}
