//! `strobe serve` - environment composition and the serve loop.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::StrobeConfig;
use crate::hmr::channel::HmrChannel;
use crate::hmr::{ChannelBroadcaster, ws::WsChannel};
use crate::log;
use crate::optimizer::{CopyBundler, DepsOptimizer};
use crate::server::{DevServer, Environment, EnvironmentKind, FsResolver};
use crate::watch::{FileChange, FsWatcher};

/// Run the dev server until Ctrl+C.
pub fn run(config: Arc<StrobeConfig>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))
}

async fn serve(config: Arc<StrobeConfig>) -> Result<()> {
    let root = config.root.clone();

    // Client environment: ws channel + optimizer.
    let ws = WsChannel::new(config.serve.ws_port);
    let client_channel =
        ChannelBroadcaster::new(vec![Arc::clone(&ws) as Arc<dyn HmrChannel>]);
    client_channel.listen();

    let optimizer = DepsOptimizer::new(
        config.optimizer.clone(),
        root.clone(),
        config.cache_dir(),
        Arc::new(CopyBundler),
    );
    let client = Environment::with_optimizer(
        EnvironmentKind::Client,
        Arc::new(FsResolver::new(root.clone())),
        client_channel,
        Arc::clone(&optimizer),
    );

    // SSR environment: same project tree, no browser channel.
    let ssr = Environment::new(
        EnvironmentKind::Ssr,
        Arc::new(FsResolver::new(root.clone())),
        ChannelBroadcaster::empty(),
    );

    let server = DevServer::new(Arc::clone(&config), vec![client, ssr]);

    optimizer.start().await;
    tokio::spawn(Arc::clone(&optimizer).run_loop());

    if config.serve.watch {
        spawn_watcher(Arc::clone(&config), Arc::clone(&server))?;
    }

    log!(
        "serve";
        "ready on {}:{} (hmr ws on {})",
        config.serve.interface,
        config.serve.port,
        ws.bound_port()
    );

    tokio::signal::ctrl_c().await?;
    log!("serve"; "shutting down");

    optimizer.close();
    for env in server.environments() {
        env.channel.close();
    }
    Ok(())
}

fn spawn_watcher(config: Arc<StrobeConfig>, server: Arc<DevServer>) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::channel::<Vec<FileChange>>(16);
    let watcher = FsWatcher::new(
        std::slice::from_ref(&config.root),
        config.serve.debounce_ms,
        events_tx,
    )?;
    tokio::spawn(watcher.run());

    let cache_dir = config.cache_dir();
    tokio::spawn(async move {
        while let Some(batch) = events_rx.recv().await {
            // Bundle commits and package installs churn below these roots;
            // their effects reach the graph through the optimizer instead.
            let batch: Vec<FileChange> = batch
                .into_iter()
                .filter(|change| {
                    !change.path.starts_with(&cache_dir)
                        && !change
                            .path
                            .components()
                            .any(|c| c.as_os_str() == "node_modules")
                })
                .collect();
            if !batch.is_empty() {
                server.handle_file_changes(batch).await;
            }
        }
    });
    Ok(())
}
