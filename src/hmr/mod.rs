//! Hot Module Replacement
//!
//! Translates file-change events into fine-grained `update` payloads or a
//! `full-reload`, per environment.
//!
//! # Architecture
//!
//! ```text
//! watcher -> [propagate] -> [dispatch] -> channels -> browsers
//!               (walk importers,  (payloads,
//!                find boundaries)  invalidation)
//! ```
//!
//! # Modules
//!
//! - `propagate` - boundary search over importer edges, circular detection
//! - `dispatch` - payload construction, dead-end handling, invalidation
//! - `lexer` - `accept(...)` call lexer populating acceptance metadata
//! - `message` - HMR payload wire types
//! - `channel` - channel trait, broadcaster, in-memory channel
//! - `ws` - WebSocket channel implementation

pub mod channel;
pub mod dispatch;
pub mod lexer;
pub mod message;
pub mod propagate;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub use channel::{ChannelBroadcaster, HmrChannel, MemoryChannel};
pub use dispatch::{UpdateOutcome, update_modules};
pub use message::{HmrPayload, Update, UpdateKind};
pub use propagate::{Boundary, propagate_update};

/// Monotonically increasing HMR timestamp.
///
/// Wall-clock milliseconds, bumped by at least one per call so that two
/// updates within the same millisecond still get distinct stamps (the stamp
/// keys `?t=` queries and the same-pass invalidation walk).
pub fn next_hmr_timestamp() -> u64 {
    static LAST: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut prev = LAST.load(Ordering::SeqCst);
    loop {
        let next = now.max(prev + 1);
        match LAST.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let a = next_hmr_timestamp();
        let b = next_hmr_timestamp();
        let c = next_hmr_timestamp();
        assert!(a < b && b < c);
    }
}
