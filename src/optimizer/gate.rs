//! First-run gate.
//!
//! The very first bundling pass must not fire while the page's initial module
//! graph is still being crawled, or it would pre-bundle a stale dep set and
//! immediately require a reload. Discovery therefore does not arm the
//! debounce until either the pre-scan completed or the request tracker has
//! observed a quiet period after the initial requests drained.
//!
//! Request tracking: `delay_until` registers an in-flight request and returns
//! a guard; dropping the guard marks the request done. `wait_until_idle`
//! parks until the waitlist drains and a full quiet period passes. A watchdog
//! forces the first run when no requests arrive at all.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::debug;

/// Gate state shared between the request tracker and the optimizer.
pub struct FirstRunGate {
    /// The optimizer may arm its debounce timer.
    ready: AtomicBool,
    /// At least one request was ever registered.
    seen_any: AtomicBool,
    /// In-flight request ids.
    waiting: Mutex<FxHashSet<String>>,
    /// Pinged on registration and on waitlist drain.
    activity: Notify,
}

/// In-flight request marker. Dropping it signals completion.
pub struct RequestGuard {
    gate: Arc<FirstRunGate>,
    id: String,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.gate.finish(&self.id);
    }
}

impl FirstRunGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            seen_any: AtomicBool::new(false),
            waiting: Mutex::new(FxHashSet::default()),
            activity: Notify::new(),
        })
    }

    /// Whether discovery may arm the debounce.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Open the gate immediately (pre-scan completed).
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.activity.notify_one();
    }

    /// Record an in-flight request. The returned guard marks it done on drop.
    pub fn delay_until(self: &Arc<Self>, id: impl Into<String>) -> RequestGuard {
        let id = id.into();
        self.seen_any.store(true, Ordering::SeqCst);
        self.waiting.lock().insert(id.clone());
        self.activity.notify_one();
        RequestGuard {
            gate: Arc::clone(self),
            id,
        }
    }

    /// Worker bundles run their own nested optimizer; their requests must not
    /// block the parent's first run.
    pub fn register_workers_source(&self, id: &str) {
        self.finish(id);
    }

    fn finish(&self, id: &str) {
        let mut waiting = self.waiting.lock();
        waiting.remove(id);
        if waiting.is_empty() {
            self.activity.notify_one();
        }
    }

    /// Park until the request waitlist drains and stays quiet for `idle_ms`.
    ///
    /// If no request arrives within `watchdog_ms` at all, the gate opens
    /// anyway so a server that is never crawled still gets its first run.
    pub async fn wait_until_idle(&self, idle_ms: u64, watchdog_ms: u64) {
        if self.is_ready() {
            return;
        }

        loop {
            if self.is_ready() {
                break;
            }

            if !self.seen_any.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(watchdog_ms)) => {
                        if !self.seen_any.load(Ordering::SeqCst) {
                            debug!("optimize"; "no requests observed, forcing first run");
                            break;
                        }
                    }
                    _ = self.activity.notified() => {}
                }
                continue;
            }

            if !self.waiting.lock().is_empty() {
                self.activity.notified().await;
                continue;
            }

            // Waitlist drained; require a full quiet period before opening.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(idle_ms)) => break,
                _ = self.activity.notified() => {}
            }
        }

        self.ready.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, timeout};

    #[tokio::test]
    async fn test_watchdog_fires_without_requests() {
        let gate = FirstRunGate::new();
        timeout(Duration::from_secs(1), gate.wait_until_idle(10, 20))
            .await
            .expect("watchdog should open the gate");
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_waits_for_in_flight_requests() {
        let gate = FirstRunGate::new();
        let guard = gate.delay_until("/src/main.js");

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_until_idle(10, 20).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!gate.is_ready());

        drop(guard);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate should open after requests drain")
            .unwrap();
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_quiet_period_restarts_on_new_request() {
        let gate = FirstRunGate::new();
        let first = gate.delay_until("/a.js");

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_until_idle(80, 20).await })
        };

        let started = Instant::now();
        drop(first);
        // Interrupt the quiet period part-way through.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = gate.delay_until("/b.js");
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(second);

        timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        // Full quiet period must have elapsed after the second request.
        assert!(started.elapsed() >= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_workers_source_unblocks() {
        let gate = FirstRunGate::new();
        let _guard = gate.delay_until("/worker.js");
        gate.register_workers_source("/worker.js");

        timeout(Duration::from_secs(1), gate.wait_until_idle(10, 20))
            .await
            .expect("worker sources must not block the first run");
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn test_mark_ready_short_circuits() {
        let gate = FirstRunGate::new();
        gate.mark_ready();
        timeout(Duration::from_millis(50), gate.wait_until_idle(10_000, 10_000))
            .await
            .expect("ready gate returns immediately");
    }
}
