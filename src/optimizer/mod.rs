//! Dependency pre-bundling optimizer.
//!
//! Keeps a cache of pre-bundled third-party dependencies current while
//! minimizing full page reloads.
//!
//! # Run state machine
//!
//! ```text
//! idle --register_missing_import--> debouncing --timer--> processing
//!   ^                                                         |
//!   |                     committing <--bundler done----------+
//!   +--commit / cancel / failure--+
//! ```
//!
//! A batch snapshots `optimized ∪ discovered`, invokes the bundler, and on
//! completion either commits (atomic rename) or cancels. Reload avoidance:
//! when the input hash and every previously emitted `file_hash` are
//! unchanged, the previous `browser_hash` is carried over so URLs already
//! fetched by the browser remain valid.
//!
//! # Modules
//!
//! - `metadata` - dep categories, hashes, URL formatting
//! - `batch` - batch completion futures
//! - `bundler` - black-box bundler contract with commit/cancel handles
//! - `gate` - first-run gate (request tracking, idle watchdog)
//! - `scan` - entry crawling for the pre-scan/scan/eager strategies
//! - `store` - persisted metadata and cache-dir helpers

pub mod batch;
pub mod bundler;
pub mod gate;
pub mod metadata;
pub mod scan;
pub mod store;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

use crate::config::{DiscoveryStrategy, OptimizerConfig};
use crate::{debug, log};

pub use batch::{BatchGate, BatchHandle};
pub use bundler::{
    BundleHandle, BundleRequest, BundleResult, Bundler, BundlerError, CopyBundler, DiskBundleHandle,
};
pub use gate::{FirstRunGate, RequestGuard};
pub use metadata::{DepInfo, DepMetadata, ExportsData};

use metadata::{compute_inputs_hash, flatten_id, speculative_browser_hash};

/// State of the current (or absent) optimizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Debouncing,
    Processing,
    Committing,
}

/// Invoked when a committed bundle requires a full page reload. The server
/// wires this to graph invalidation plus the environment channels.
pub type ReloadHook = Box<dyn Fn() + Send + Sync>;

struct BatchState {
    /// Gate for deps registered since the last snapshot.
    current: BatchGate,
    /// Gates of snapshots awaiting a commit.
    queued: Vec<BatchGate>,
    /// A dep was registered while a batch was processing.
    new_deps_discovered: bool,
}

/// Per-environment dependency optimizer.
pub struct DepsOptimizer {
    config: OptimizerConfig,
    root: PathBuf,
    cache_dir: PathBuf,
    bundler: Arc<dyn Bundler>,
    gate: Arc<FirstRunGate>,

    state: Mutex<RunState>,
    metadata: Mutex<DepMetadata>,
    batch: Mutex<BatchState>,

    /// Debounce deadline; the run loop sleeps toward it.
    deadline: Mutex<Option<Instant>>,
    armed: Notify,
    closed: AtomicBool,

    /// Discriminates speculative hashes across server restarts.
    session: u64,
    on_full_reload: Mutex<Option<ReloadHook>>,
}

impl DepsOptimizer {
    /// Create an optimizer, loading persisted metadata when its hash matches
    /// the current inputs.
    pub fn new(
        config: OptimizerConfig,
        root: PathBuf,
        cache_dir: PathBuf,
        bundler: Arc<dyn Bundler>,
    ) -> Arc<Self> {
        let inputs_hash = compute_inputs_hash(&root, &config);
        let metadata = match store::load_metadata(&cache_dir, &inputs_hash) {
            Some(loaded) => {
                log!("optimize"; "reusing cached bundle ({} deps)", loaded.optimized.len());
                loaded
            }
            None => DepMetadata::new(inputs_hash),
        };

        let session = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Arc::new(Self {
            config,
            root,
            cache_dir,
            bundler,
            gate: FirstRunGate::new(),
            state: Mutex::new(RunState::Idle),
            metadata: Mutex::new(metadata),
            batch: Mutex::new(BatchState {
                current: BatchGate::new(),
                queued: Vec::new(),
                new_deps_discovered: false,
            }),
            deadline: Mutex::new(None),
            armed: Notify::new(),
            closed: AtomicBool::new(false),
            session,
            on_full_reload: Mutex::new(None),
        })
    }

    /// Wire the full-reload side effect (graph invalidation + channels).
    pub fn set_reload_hook(&self, hook: ReloadHook) {
        *self.on_full_reload.lock() = Some(hook);
    }

    /// The first-run gate, for request tracking by the serving layer.
    pub fn gate(&self) -> &Arc<FirstRunGate> {
        &self.gate
    }

    /// Record an in-flight request that must drain before the first run.
    pub fn delay_until(&self, id: impl Into<String>) -> RequestGuard {
        self.gate.delay_until(id)
    }

    /// Worker bundles get their own nested optimizer; their requests must
    /// not hold the parent's first run hostage.
    pub fn register_workers_source(&self, id: &str) {
        self.gate.register_workers_source(id);
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Clone of the current metadata. Readers holding a snapshot across a
    /// commit intentionally keep seeing the old state.
    pub fn metadata_snapshot(&self) -> DepMetadata {
        self.metadata.lock().clone()
    }

    /// Register a bare import that is not yet tracked.
    ///
    /// Returns the dep info (with a speculative `browser_hash` and a
    /// processing handle tied to the current batch) so the caller can rewrite
    /// the import URL immediately. Returns `None` for excluded specifiers.
    pub fn register_missing_import(&self, id: &str, src: Option<PathBuf>) -> Option<DepInfo> {
        if self.config.exclude.iter().any(|e| e == id) {
            return None;
        }

        let info = {
            let mut metadata = self.metadata.lock();
            if let Some(existing) = metadata.get(id) {
                return Some(existing.clone());
            }

            let mut batch = self.batch.lock();
            let browser_hash =
                speculative_browser_hash(&metadata.hash, &metadata, &[id], self.session);
            let info = DepInfo {
                id: id.to_string(),
                file: self.cache_dir.join("deps").join(format!("{}.js", flatten_id(id))),
                src,
                file_hash: None,
                browser_hash,
                needs_interop: None,
                exports_data: None,
                processing: Some(batch.current.handle()),
            };
            metadata.discovered.insert(id.to_string(), info.clone());
            debug!("optimize"; "discovered {}", id);

            if matches!(*self.state.lock(), RunState::Processing | RunState::Committing) {
                batch.new_deps_discovered = true;
            }
            info
        };

        if self.gate.is_ready() {
            self.arm_debounce();
        }
        Some(info)
    }

    /// Startup behavior per discovery strategy.
    pub async fn start(self: &Arc<Self>) {
        let strategy = self.config.strategy;
        if !strategy.scans_entries() {
            return;
        }

        if strategy == DiscoveryStrategy::PreScan {
            self.scan_and_register().await;
            self.gate.mark_ready();
            self.run_batch().await;
            return;
        }

        // Background scan; the gate opens when it completes.
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.scan_and_register().await;
            this.gate.mark_ready();
            this.arm_if_pending();
        });
    }

    /// Scan entries and register everything found (plus forced includes).
    pub async fn scan_and_register(self: &Arc<Self>) {
        *self.state.lock() = RunState::Scanning;
        let include_dynamic = self.config.strategy.crawls_dynamic_imports();

        let root = self.root.clone();
        let entries = self.config.entries.clone();
        let found = tokio::task::spawn_blocking(move || {
            scan::scan_entries(&root, &entries, include_dynamic)
        })
        .await
        .unwrap_or_default();

        for id in self.config.include.iter().cloned().chain(found) {
            self.register_missing_import(&id, None);
        }
        *self.state.lock() = RunState::Idle;
    }

    /// Drive debounce timing and batch execution until closed.
    pub async fn run_loop(self: Arc<Self>) {
        // Open the gate on idle (or watchdog) for the lazy path; scanning
        // strategies open it from `start`.
        {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.gate
                    .wait_until_idle(this.config.idle_ms, this.config.first_run_watchdog_ms)
                    .await;
                this.arm_if_pending();
            });
        }

        loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            let deadline = *self.deadline.lock();
            match deadline {
                Some(at) => {
                    let now = Instant::now();
                    if at <= now {
                        *self.deadline.lock() = None;
                        self.run_batch().await;
                        // Discoveries that arrived mid-run fold into the
                        // next batch.
                        self.arm_if_pending();
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(at - now) => {}
                            _ = self.armed.notified() => {}
                        }
                    }
                }
                None => self.armed.notified().await,
            }
        }
    }

    /// Stop the run loop.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.armed.notify_one();
    }

    fn arm_debounce(&self) {
        {
            let mut state = self.state.lock();
            if *state == RunState::Idle {
                *state = RunState::Debouncing;
            }
        }
        *self.deadline.lock() = Some(Instant::now() + Duration::from_millis(self.config.debounce_ms));
        self.armed.notify_one();
    }

    fn arm_if_pending(&self) {
        let pending = !self.metadata.lock().discovered.is_empty();
        if pending && self.gate.is_ready() {
            self.arm_debounce();
        }
    }

    /// Execute one batch: snapshot, bundle, commit-or-cancel.
    pub async fn run_batch(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if matches!(*state, RunState::Processing | RunState::Committing) {
                return;
            }
            *state = RunState::Processing;
        }

        let request = {
            let metadata = self.metadata.lock();
            let mut deps: FxHashMap<String, DepInfo> = FxHashMap::default();
            for (id, info) in metadata.optimized.iter().chain(metadata.discovered.iter()) {
                deps.insert(id.clone(), info.clone());
            }

            // Rotate the batch gate: the snapshot's gate waits for this
            // commit; deps registered from now on belong to the next batch.
            let mut batch = self.batch.lock();
            let snapshot_gate = std::mem::take(&mut batch.current);
            batch.queued.push(snapshot_gate);
            batch.new_deps_discovered = false;

            BundleRequest {
                deps,
                cache_dir: self.cache_dir.clone(),
                inputs_hash: metadata.hash.clone(),
            }
        };

        debug!("optimize"; "bundling {} deps", request.deps.len());
        let result = self.bundler.bundle(request).await;

        *self.state.lock() = RunState::Committing;
        match result {
            Ok(bundle) => self.commit_run(bundle),
            Err(e) => {
                log!("optimize"; "bundling failed: {}", e);
                // Requests will rediscover; committed metadata stays intact.
                self.metadata.lock().discovered.clear();
                let mut batch = self.batch.lock();
                for gate in batch.queued.drain(..) {
                    gate.resolve();
                }
            }
        }
        *self.state.lock() = RunState::Idle;
    }

    fn commit_run(self: &Arc<Self>, bundle: BundleResult) {
        let (needs_reload, overlapped) = {
            let metadata = self.metadata.lock();
            let new = &bundle.metadata;

            let interop_mismatch = metadata.discovered.iter().any(|(id, info)| {
                info.needs_interop.is_some_and(|declared| {
                    new.optimized.get(id).and_then(|d| d.needs_interop) != Some(declared)
                })
            });
            let hash_changed = metadata.hash != new.hash;
            let file_hash_changed = metadata.optimized.iter().any(|(id, prev)| {
                new.optimized.get(id).map(|d| &d.file_hash) != Some(&prev.file_hash)
            });

            if interop_mismatch {
                debug!("optimize"; "interop mismatch detected");
            }

            (
                interop_mismatch || hash_changed || file_hash_changed,
                self.batch.lock().new_deps_discovered,
            )
        };

        if needs_reload && overlapped {
            // A reload now would be followed by another once the overlapping
            // deps land; discard and let the next run cover everything. The
            // queued gates roll over to that commit.
            debug!("optimize"; "delaying reload, new deps discovered during bundling");
            bundle.handle.cancel();
            return;
        }

        if let Err(e) = bundle.handle.commit() {
            log!("optimize"; "failed to commit bundle: {}", e);
            self.metadata.lock().discovered.clear();
            let mut batch = self.batch.lock();
            for gate in batch.queued.drain(..) {
                gate.resolve();
            }
            return;
        }

        {
            let mut metadata = self.metadata.lock();
            let mut new_meta = bundle.metadata;

            if !needs_reload {
                // Reload-safe: keep every URL the browser already fetched
                // valid by carrying the previous browser hashes over.
                new_meta.browser_hash = metadata.browser_hash.clone();
                let carried = new_meta.browser_hash.clone();
                for dep in new_meta.chunks.values_mut() {
                    dep.browser_hash = carried.clone();
                }
                for (id, dep) in new_meta.optimized.iter_mut() {
                    dep.browser_hash = metadata
                        .optimized
                        .get(id)
                        .or_else(|| metadata.discovered.get(id))
                        .map(|prev| prev.browser_hash.clone())
                        .unwrap_or_else(|| carried.clone());
                }
            }

            // Deps registered between snapshot and commit stay discovered.
            for (id, info) in metadata.discovered.iter() {
                if !new_meta.optimized.contains_key(id) && !new_meta.chunks.contains_key(id) {
                    new_meta.discovered.insert(id.clone(), info.clone());
                }
            }

            *metadata = new_meta;
            if let Err(e) = store::save_metadata(&self.cache_dir, &metadata) {
                debug!("optimize"; "failed to persist metadata: {}", e);
            }

            let mut batch = self.batch.lock();
            for gate in batch.queued.drain(..) {
                gate.resolve();
            }
        }

        if needs_reload {
            log!("optimize"; "optimized dependencies changed, reloading");
            if let Some(hook) = self.on_full_reload.lock().as_ref() {
                hook();
            }
        }
    }
}
