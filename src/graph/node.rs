//! Module node types.
//!
//! Nodes are arena-allocated and addressed by [`ModuleIdx`]; edges between
//! nodes are stored as index sets. The four string lookup tables (url, id,
//! file, etag) live in the graph store, not on the nodes.

use rustc_hash::{FxHashMap, FxHashSet};
use std::path::PathBuf;

use crate::utils::url::is_css_request;

/// Arena index of a module node, unique within one environment's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(pub u32);

impl ModuleIdx {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of request a module answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Js,
    Css,
}

impl ModuleKind {
    /// Derive the kind from a module URL.
    pub fn from_url(url: &str) -> Self {
        if is_css_request(url) { Self::Css } else { Self::Js }
    }

    /// Payload type label (`js-update` / `css-update`).
    pub fn update_label(self) -> &'static str {
        match self {
            Self::Js => "js-update",
            Self::Css => "css-update",
        }
    }
}

/// Whether a module declared it can re-run itself on update.
///
/// `Unknown` means the module has not been through the transform pipeline yet;
/// the propagator treats such modules as "never loaded" and stops there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfAccepting {
    #[default]
    Unknown,
    Accepts,
    Declines,
}

impl SelfAccepting {
    #[inline]
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    #[inline]
    pub fn accepts(self) -> bool {
        matches!(self, Self::Accepts)
    }
}

/// Cached output of the transform pipeline for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
    pub map: Option<String>,
    pub etag: String,
    /// Statically imported URLs discovered during transform.
    pub deps: Vec<String>,
    /// Dynamically imported URLs discovered during transform.
    pub dynamic_deps: Vec<String>,
}

impl TransformResult {
    pub fn new(code: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
            etag: etag.into(),
            deps: Vec::new(),
            dynamic_deps: Vec::new(),
        }
    }
}

/// Invalidation state of a module node.
///
/// Soft invalidation keeps the prior transform result around: the transform
/// pipeline may reuse it by rewriting only the import timestamp queries. Hard
/// invalidation mandates a full re-transform and, once set, sticks until the
/// node is re-transformed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InvalidationState {
    #[default]
    Fresh,
    Soft(TransformResult),
    Hard,
}

impl InvalidationState {
    #[inline]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    #[inline]
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard)
    }

    /// The reusable prior transform result, if soft-invalidated.
    pub fn soft_result(&self) -> Option<&TransformResult> {
        match self {
            Self::Soft(result) => Some(result),
            _ => None,
        }
    }
}

/// One module within one environment.
///
/// Created by `ensure_entry_from_url` (resolved entries) or
/// `create_file_only_entry` (assets reachable only by file path). Never
/// destroyed during a server lifetime; invalidation only clears the cached
/// transform result.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Public path, starts with `/`.
    pub url: String,
    /// Resolved identifier (path + query). `None` for file-only entries.
    pub id: Option<String>,
    /// Filesystem path without query. Shared between nodes whose ids differ
    /// only by query.
    pub file: PathBuf,
    pub kind: ModuleKind,

    /// Modules importing this one.
    pub importers: FxHashSet<ModuleIdx>,
    /// Modules this one imports.
    pub imported_modules: FxHashSet<ModuleIdx>,
    /// Subset of `imported_modules` imported statically in code.
    pub static_imported: FxHashSet<ModuleIdx>,
    /// Modules this one explicitly accepts updates from.
    pub accepted_hmr_deps: FxHashSet<ModuleIdx>,
    /// Export names this module partially accepts. `None` if none.
    pub accepted_hmr_exports: Option<FxHashSet<String>>,
    /// importee id -> binding names this module consumes from it.
    pub imported_bindings: FxHashMap<String, FxHashSet<String>>,

    pub self_accepting: SelfAccepting,
    pub transform_result: Option<TransformResult>,
    pub invalidation: InvalidationState,
    pub last_hmr_timestamp: u64,
    pub last_invalidation_timestamp: u64,

    /// Opaque plugin metadata attached at resolve time.
    pub meta: Option<serde_json::Value>,
}

impl ModuleNode {
    pub fn new(url: String, id: Option<String>, file: PathBuf) -> Self {
        let kind = ModuleKind::from_url(&url);
        Self {
            url,
            id,
            file,
            kind,
            importers: FxHashSet::default(),
            imported_modules: FxHashSet::default(),
            static_imported: FxHashSet::default(),
            accepted_hmr_deps: FxHashSet::default(),
            accepted_hmr_exports: None,
            imported_bindings: FxHashMap::default(),
            self_accepting: SelfAccepting::Unknown,
            transform_result: None,
            invalidation: InvalidationState::Fresh,
            last_hmr_timestamp: 0,
            last_invalidation_timestamp: 0,
            meta: None,
        }
    }

    #[inline]
    pub fn is_css(&self) -> bool {
        self.kind == ModuleKind::Css
    }

    /// Whether partial export acceptance is declared and non-empty.
    #[inline]
    pub fn accepts_exports(&self) -> bool {
        self.accepted_hmr_exports.as_ref().is_some_and(|e| !e.is_empty())
    }
}
