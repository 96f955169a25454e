//! Environments.
//!
//! An environment is one named plugin+runtime pairing (`client`, `ssr`) with
//! its own module graph, its own optional dep optimizer, and its own set of
//! HMR channels. The dev server composes one or more of them; the client
//! environment always comes first and is the only one indexing responses by
//! etag.

use std::sync::Arc;

use crate::graph::{ModuleGraph, ModuleResolver};
use crate::hmr::ChannelBroadcaster;
use crate::optimizer::DepsOptimizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Client,
    Ssr,
}

impl EnvironmentKind {
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Ssr => "ssr",
        }
    }
}

/// One runtime target with its graph, optimizer, and channels.
pub struct Environment {
    pub name: String,
    pub kind: EnvironmentKind,
    pub graph: Arc<ModuleGraph>,
    pub optimizer: Option<Arc<DepsOptimizer>>,
    pub channel: Arc<ChannelBroadcaster>,
}

impl Environment {
    pub fn new(
        kind: EnvironmentKind,
        resolver: Arc<dyn ModuleResolver>,
        channel: ChannelBroadcaster,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: kind.default_name().to_string(),
            kind,
            graph: ModuleGraph::new(resolver, kind == EnvironmentKind::Client),
            optimizer: None,
            channel: Arc::new(channel),
        })
    }

    pub fn with_optimizer(
        kind: EnvironmentKind,
        resolver: Arc<dyn ModuleResolver>,
        channel: ChannelBroadcaster,
        optimizer: Arc<DepsOptimizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: kind.default_name().to_string(),
            kind,
            graph: ModuleGraph::new(resolver, kind == EnvironmentKind::Client),
            optimizer: Some(optimizer),
            channel: Arc::new(channel),
        })
    }
}
