//! Batch completion signalling.
//!
//! Every discovered dep carries a handle that resolves when the batch it
//! belongs to lands in a commit. Requests holding a handle park on it and
//! then re-read the metadata for final file paths and hashes.

use tokio::sync::watch;

/// Resolver side of a batch future. Owned by the optimizer.
#[derive(Debug)]
pub struct BatchGate {
    tx: watch::Sender<bool>,
}

impl BatchGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A handle that resolves when this gate does.
    pub fn handle(&self) -> BatchHandle {
        BatchHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Release every handle.
    pub fn resolve(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for BatchGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter side of a batch future. Cloneable; resolves at (or after) the next
/// commit, or when the batch is abandoned on bundler failure.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    rx: watch::Receiver<bool>,
}

impl BatchHandle {
    /// Wait until the owning batch resolved.
    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Gate dropped without resolving; treat as released so
                // waiters never hang.
                return;
            }
        }
    }

    /// Non-blocking check.
    pub fn is_resolved(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_releases_waiters() {
        let gate = BatchGate::new();
        let handle = gate.handle();
        assert!(!handle.is_resolved());

        let waiter = tokio::spawn(handle.wait());
        gate.resolve();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_after_resolve_returns_immediately() {
        let gate = BatchGate::new();
        gate.resolve();
        gate.handle().wait().await;
    }

    #[tokio::test]
    async fn test_dropped_gate_releases_waiters() {
        let gate = BatchGate::new();
        let handle = gate.handle();
        drop(gate);
        handle.wait().await;
    }
}
