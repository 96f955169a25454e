//! Filesystem watching.
//!
//! Bridges notify's sync callback into the async world, debounces bursts,
//! and hands batched [`FileChange`]s to the server.
//!
//! ```text
//! notify -> sync channel -> bridge thread -> tokio channel -> debouncer -> server
//! ```
//!
//! The watcher attaches before the server starts serving ("watcher-first"):
//! events occurring during startup buffer in the channel instead of being
//! lost.

mod debouncer;
pub mod read;

pub use debouncer::ChangeKind;
pub use read::read_modified_file;

use std::path::PathBuf;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use debouncer::Debouncer;

/// One debounced file event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Filesystem watcher feeding debounced change batches into a channel.
pub struct FsWatcher {
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    watcher: RecommendedWatcher,
    debouncer: Debouncer,
    events_tx: mpsc::Sender<Vec<FileChange>>,
}

impl FsWatcher {
    /// Create a watcher over `roots`. Watching starts immediately; events
    /// buffer while the caller finishes startup.
    pub fn new(
        roots: &[PathBuf],
        window_ms: u64,
        events_tx: mpsc::Sender<Vec<FileChange>>,
    ) -> notify::Result<Self> {
        // notify's callback is sync; bridge through a std channel.
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        for root in roots {
            if root.exists() {
                watcher.watch(root, RecursiveMode::Recursive)?;
            }
        }

        Ok(Self {
            notify_rx,
            watcher,
            debouncer: Debouncer::new(window_ms),
            events_tx,
        })
    }

    /// Run the watch loop until the receiving side is dropped.
    pub async fn run(self) {
        let Self {
            notify_rx,
            watcher,
            mut debouncer,
            events_tx,
        } = self;
        let _watcher = watcher;

        let (bridge_tx, mut bridge_rx) = mpsc::channel::<notify::Event>(64);
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if bridge_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                event = bridge_rx.recv() => {
                    let Some(event) = event else { break };
                    debouncer.add_event(&event);
                }
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    let Some(changes) = debouncer.take_if_ready() else { continue };
                    let mut batch: Vec<FileChange> = changes
                        .into_iter()
                        .map(|(path, kind)| FileChange { path, kind })
                        .collect();
                    batch.sort_by(|a, b| a.path.cmp(&b.path));
                    if events_tx.send(batch).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_watcher_reports_modification() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.js");
        fs::write(&file, "v1").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = FsWatcher::new(&[dir.path().to_path_buf()], 20, tx).unwrap();
        let handle = tokio::spawn(watcher.run());

        // Give the backend a moment to attach, then modify.
        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&file, "v2").unwrap();

        let batch = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should report within timeout")
            .expect("channel open");
        assert!(batch.iter().any(|c| c.path.file_name().is_some_and(|n| n == "app.js")));

        drop(rx);
        handle.abort();
    }
}
