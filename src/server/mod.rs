//! Dev server composition.
//!
//! Owns the ordered environment list (client first) and wires the watcher,
//! the HMR propagator, and the optimizers together. The HTTP transport and
//! the plugin transform pipeline are external; this layer exposes the graph
//! surface they consume and reacts to file events.
//!
//! HMR across environments runs in series, in environment order: updates for
//! the client land before the ssr pass starts.

pub mod environment;
pub mod resolver;

pub use environment::{Environment, EnvironmentKind};
pub use resolver::FsResolver;

use rustc_hash::FxHashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::StrobeConfig;
use crate::graph::{ModuleIdx, TransformResult};
use crate::hmr::{HmrPayload, next_hmr_timestamp, update_modules};
use crate::utils::hash::short_hash;
use crate::watch::{ChangeKind, FileChange, read_modified_file};
use crate::{debug, log};

/// Errors expected while requests race server lifecycle; callers swallow
/// them during warmup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServeError {
    /// The requested optimized dep belongs to a superseded bundle.
    #[error("outdated optimized dep: {0}")]
    OutdatedOptimizedDep(String),
    /// The server is shutting down.
    #[error("server is closed")]
    ClosedServer,
}

/// The composed dev server core.
pub struct DevServer {
    config: Arc<StrobeConfig>,
    /// Ordered: client environment first.
    environments: Vec<Arc<Environment>>,
}

impl DevServer {
    pub fn new(config: Arc<StrobeConfig>, environments: Vec<Arc<Environment>>) -> Arc<Self> {
        let server = Arc::new(Self {
            config,
            environments,
        });

        // A committed bundle that requires a reload must first drop every
        // cached transform holding stale optimized-dep URLs.
        for env in &server.environments {
            if let Some(optimizer) = &env.optimizer {
                let environments: Vec<Arc<Environment>> = server.environments.clone();
                optimizer.set_reload_hook(Box::new(move || {
                    for env in &environments {
                        env.graph.invalidate_all();
                    }
                    for env in &environments {
                        env.channel.send(&HmrPayload::FullReload {
                            path: None,
                            triggered_by: None,
                        });
                    }
                }));
            }
        }

        server
    }

    pub fn environments(&self) -> &[Arc<Environment>] {
        &self.environments
    }

    /// The client environment (always present, always first).
    pub fn client(&self) -> &Arc<Environment> {
        &self.environments[0]
    }

    /// Entry point for debounced watcher batches.
    pub async fn handle_file_changes(&self, changes: Vec<FileChange>) {
        for change in changes {
            self.handle_file_change(&change).await;
        }
    }

    async fn handle_file_change(&self, change: &FileChange) {
        let path = &change.path;
        let public = self.public_path(path);

        if change.kind != ChangeKind::Removed {
            // Editors truncate before writing; wait out the empty window so
            // the transform pipeline sees the real content.
            match read_modified_file(
                path,
                self.config.serve.read_retries,
                self.config.serve.read_retry_interval_ms,
            )
            .await
            {
                Ok(content) => {
                    debug!("watch"; "{} {} ({} bytes)", change.kind.label(), public, content.len())
                }
                Err(e) => debug!("watch"; "cannot read {}: {}", public, e),
            }
        }

        // Series across environments: client first, then ssr.
        let mut any_update = false;
        for env in &self.environments {
            let modules = env.graph.modules_by_file(path);
            env.graph.on_file_change(path);

            if modules.is_empty() {
                debug!("hmr"; "no modules for {} in {}", public, env.name);
                continue;
            }

            let timestamp = next_hmr_timestamp();
            let outcome = update_modules(&env.graph, &env.channel, &public, &modules, timestamp);
            debug!("hmr"; "{}: {:?} for {}", env.name, outcome, public);
            any_update |= outcome != crate::hmr::UpdateOutcome::NoUpdate;
        }

        if any_update {
            crate::logger::status_success(&format!("updated {public}"));
        } else {
            crate::logger::status_unchanged(&public);
        }
    }

    /// Modules that lost their last importer: stamp and tell clients to
    /// dispose of them.
    pub fn prune_modules(&self, env: &Environment, orphans: &FxHashSet<ModuleIdx>) {
        if orphans.is_empty() {
            return;
        }

        let timestamp = next_hmr_timestamp();
        let mut seen = FxHashSet::default();
        let mut paths = Vec::new();
        for &idx in orphans {
            env.graph
                .invalidate_module(idx, &mut seen, timestamp, true, false);
            paths.push(env.graph.node(idx).url);
        }
        paths.sort();

        log!("hmr"; "pruned {} modules", paths.len());
        env.channel.send(&HmrPayload::prune(paths));
    }

    /// Validate an optimized-dep request's `?v=` against the environment's
    /// current metadata.
    ///
    /// Callers swallow [`ServeError::OutdatedOptimizedDep`] during warmup:
    /// the browser is about to receive a reload anyway.
    pub fn check_optimized_dep(
        &self,
        env: &Environment,
        id: &str,
        browser_hash: &str,
    ) -> Result<(), ServeError> {
        let Some(optimizer) = &env.optimizer else {
            return Ok(());
        };
        if optimizer.metadata_snapshot().is_current(id, browser_hash) {
            Ok(())
        } else {
            Err(ServeError::OutdatedOptimizedDep(id.to_string()))
        }
    }

    /// Soft-invalidation fast path: reuse the saved transform result with
    /// import timestamps rewritten, skipping a full re-transform.
    ///
    /// The rewritten result is stored back as the node's fresh transform
    /// result. Returns `None` when the node is not soft-invalidated.
    pub fn reuse_soft_result(
        &self,
        env: &Environment,
        idx: ModuleIdx,
        timestamp: u64,
    ) -> Option<TransformResult> {
        let node = env.graph.node(idx);
        let prior = node.invalidation.soft_result()?.clone();

        let code = rewrite_timestamp_queries(&prior.code, timestamp);
        // Stale inline sourcemap URLs must not survive the rewrite; the map
        // is re-derived (or dropped) instead of reused verbatim.
        let code = strip_sourcemap_comment(&code);

        let result = TransformResult {
            etag: short_hash(&code),
            code,
            map: None,
            deps: prior.deps,
            dynamic_deps: prior.dynamic_deps,
        };
        env.graph
            .update_module_transform_result(idx, Some(result.clone()));
        Some(result)
    }

    fn public_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.config.root) {
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => path.display().to_string(),
        }
    }
}

/// Replace every `t=<digits>` query value with the new timestamp.
fn rewrite_timestamp_queries(code: &str, timestamp: u64) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    loop {
        let Some(pos) = rest.find("t=") else {
            out.push_str(rest);
            return out;
        };
        // Only rewrite query parameters, not arbitrary `t=` text.
        let is_query = pos > 0 && matches!(rest.as_bytes()[pos - 1], b'?' | b'&');
        let digits = rest[pos + 2..].bytes().take_while(u8::is_ascii_digit).count();

        if is_query && digits > 0 {
            out.push_str(&rest[..pos]);
            out.push_str(&format!("t={timestamp}"));
            rest = &rest[pos + 2 + digits..];
        } else {
            out.push_str(&rest[..pos + 2]);
            rest = &rest[pos + 2..];
        }
    }
}

/// Drop a trailing `//# sourceMappingURL=` comment.
fn strip_sourcemap_comment(code: &str) -> String {
    code.lines()
        .filter(|line| !line.trim_start().starts_with("//# sourceMappingURL="))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrobeConfig;
    use crate::graph::testing::IdentityResolver;
    use crate::graph::{InvalidationState, ModuleInfoUpdate};
    use crate::hmr::channel::HmrChannel;
    use crate::hmr::{ChannelBroadcaster, MemoryChannel};
    use std::path::PathBuf;

    struct Fixture {
        server: Arc<DevServer>,
        channel: Arc<MemoryChannel>,
    }

    fn fixture() -> Fixture {
        let mut config = StrobeConfig::default();
        config.root = PathBuf::from("/project");
        config.serve.read_retries = 1;
        config.serve.read_retry_interval_ms = 1;

        let channel = MemoryChannel::new();
        let broadcaster =
            ChannelBroadcaster::new(vec![Arc::clone(&channel) as Arc<dyn HmrChannel>]);
        let env = Environment::new(
            EnvironmentKind::Client,
            Arc::new(IdentityResolver),
            broadcaster,
        );
        let server = DevServer::new(Arc::new(config), vec![env]);
        Fixture { server, channel }
    }

    #[tokio::test]
    async fn test_prune_sends_payload_and_stamps() {
        let fx = fixture();
        let env = Arc::clone(fx.server.client());
        let gone = env.graph.ensure_entry_from_url("/gone.js").await.unwrap();

        let mut orphans = FxHashSet::default();
        orphans.insert(gone);
        fx.server.prune_modules(&env, &orphans);

        assert_eq!(
            fx.channel.sent(),
            vec![HmrPayload::prune(vec!["/gone.js".to_string()])]
        );
        env.graph.read(|store| {
            assert!(store.node(gone).last_hmr_timestamp > 0);
        });
    }

    #[tokio::test]
    async fn test_soft_fast_path_rewrites_timestamps() {
        let fx = fixture();
        let env = Arc::clone(fx.server.client());
        let main = env.graph.ensure_entry_from_url("/main.js").await.unwrap();
        let update = ModuleInfoUpdate {
            imported: vec!["/dep.js".to_string()],
            ..Default::default()
        };
        update_edges(&env, main, update).await;
        let dep = env.graph.module_by_url("/dep.js").await.unwrap();

        let code = "import \"/dep.js?t=111\";\n//# sourceMappingURL=main.js.map";
        env.graph.update_module_transform_result(
            main,
            Some(TransformResult {
                code: code.to_string(),
                map: None,
                etag: "old".to_string(),
                deps: vec!["/dep.js".to_string()],
                dynamic_deps: vec![],
            }),
        );

        // Soft-invalidate main directly.
        let mut seen = FxHashSet::default();
        env.graph.invalidate_module(main, &mut seen, 50, true, true);
        assert!(matches!(
            env.graph.node(main).invalidation,
            InvalidationState::Soft(_)
        ));

        let result = fx.server.reuse_soft_result(&env, main, 222).unwrap();
        assert!(result.code.contains("/dep.js?t=222"));
        assert!(!result.code.contains("sourceMappingURL"));
        // Node is valid again with the rewritten result cached.
        env.graph.read(|store| {
            assert!(store.node(main).invalidation.is_fresh());
            assert!(store.node(main).transform_result.is_some());
        });
        let _ = dep;
    }

    async fn update_edges(env: &Arc<Environment>, idx: ModuleIdx, update: ModuleInfoUpdate) {
        env.graph.update_module_info(idx, update).await.unwrap();
    }

    #[test]
    fn test_rewrite_timestamp_queries() {
        assert_eq!(
            rewrite_timestamp_queries("import \"/a.js?t=1\"; import \"/b.js?v=x&t=23\";", 99),
            "import \"/a.js?t=99\"; import \"/b.js?v=x&t=99\";"
        );
        // Non-query `t=` text is untouched.
        assert_eq!(rewrite_timestamp_queries("const t=5;", 99), "const t=5;");
    }

    #[test]
    fn test_strip_sourcemap_comment() {
        let code = "const x = 1;\n//# sourceMappingURL=x.js.map";
        assert_eq!(strip_sourcemap_comment(code), "const x = 1;");
    }

    #[tokio::test]
    async fn test_file_change_emits_update_per_environment_serially() {
        let fx = fixture();
        let env = Arc::clone(fx.server.client());

        // Node whose file is under the project root; identity resolver keeps
        // the url as id, so the file is "/self.js".
        let idx = env
            .graph
            .ensure_entry_from_url("/project/self.js")
            .await
            .unwrap();
        let update = ModuleInfoUpdate {
            is_self_accepting: true,
            ..Default::default()
        };
        env.graph.update_module_info(idx, update).await.unwrap();

        fx.server
            .handle_file_changes(vec![FileChange {
                path: PathBuf::from("/project/self.js"),
                kind: ChangeKind::Removed,
            }])
            .await;

        let sent = fx.channel.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], HmrPayload::Update { .. }));
    }
}
