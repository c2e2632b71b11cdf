//! Reply correlation.
//!
//! When a bus message that expects an answer is delivered to a client, the
//! client has to be allowed to `send` to the message's reply address even
//! though no permission rule mentions it.  [`ReplyCorrelator`] remembers
//! such addresses for `reply_timeout` and hands the original message back
//! exactly once.
//!
//! # Exactly-once removal
//!
//! Each tracked entry carries a generation number.  The eviction timer only
//! removes the entry it was scheduled for, so an address that was consumed
//! and tracked again is not evicted early by the first entry's timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::application::bus::BusMessage;

#[derive(Debug)]
struct PendingReply {
    message: BusMessage,
    generation: u64,
}

type PendingMap = HashMap<String, PendingReply>;

/// Engine-wide table of reply addresses awaiting a client answer.
#[derive(Debug, Default)]
pub struct ReplyCorrelator {
    pending: Arc<Mutex<PendingMap>>,
    generations: AtomicU64,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers `message` under `reply_address` and schedules its eviction.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn track(&self, reply_address: String, message: BusMessage, timeout: Duration) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        lock(&self.pending).insert(
            reply_address.clone(),
            PendingReply {
                message,
                generation,
            },
        );

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut map = lock(&pending);
            if map
                .get(&reply_address)
                .is_some_and(|entry| entry.generation == generation)
            {
                map.remove(&reply_address);
                debug!(address = %reply_address, "reply address expired");
            }
        });
    }

    /// Removes and returns the message awaiting a reply at `address`.
    pub fn consume(&self, address: &str) -> Option<BusMessage> {
        lock(&self.pending).remove(address).map(|entry| entry.message)
    }

    pub fn contains(&self, address: &str) -> bool {
        lock(&self.pending).contains_key(address)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
