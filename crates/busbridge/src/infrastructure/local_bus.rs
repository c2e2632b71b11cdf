//! In-process event bus.
//!
//! [`LocalBus`] is a small, single-process implementation of [`EventBus`]:
//!
//! - `send` delivers to one consumer of the address, rotating round-robin.
//! - `publish` delivers to every consumer.
//! - `request` attaches a fresh reply address (a UUID v4), delivers like
//!   `send`, and waits for the answer on a one-shot channel.
//!
//! Sending to a reply address resolves the waiting request instead of
//! looking for consumers, which is how `reply` and `reply_and_request` work.
//!
//! # Reply waiters (for beginners)
//!
//! A `tokio::sync::oneshot` channel carries exactly one value from one task
//! to another.  Each outstanding request parks the receiving half and stores
//! the sending half in `waiters` under its reply address.  Whoever answers
//! takes the sender out of the map and fires it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::application::bus::{
    BusMessage, DeliveryOptions, EventBus, ReplyFailure, Subscription, SubscriptionId,
};

/// Request timeout used when [`DeliveryOptions::timeout`] is `None`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type ReplySender = oneshot::Sender<Result<BusMessage, ReplyFailure>>;

struct Consumer {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BusState {
    consumers: HashMap<String, Vec<Consumer>>,
    /// Next consumer index per address for `send`.
    cursors: HashMap<String, usize>,
    waiters: HashMap<String, ReplySender>,
}

impl BusState {
    /// Hands `message` to one consumer.  Returns `false` if there is none.
    fn deliver_one(&mut self, message: BusMessage) -> bool {
        let Some(consumers) = self.consumers.get_mut(&message.address) else {
            return false;
        };
        consumers.retain(|c| !c.sender.is_closed());
        if consumers.is_empty() {
            return false;
        }
        let cursor = self.cursors.entry(message.address.clone()).or_insert(0);
        let index = *cursor % consumers.len();
        *cursor = index + 1;
        consumers[index].sender.send(message).is_ok()
    }

    /// Hands `message` to every consumer.  Returns how many received it.
    fn deliver_all(&mut self, message: &BusMessage) -> usize {
        let Some(consumers) = self.consumers.get_mut(&message.address) else {
            return 0;
        };
        consumers.retain(|c| !c.sender.is_closed());
        consumers
            .iter()
            .filter(|c| c.sender.send(message.clone()).is_ok())
            .count()
    }
}

/// The in-process event bus.
#[derive(Default)]
pub struct LocalBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the request waiting at `reply_address` with a
    /// `RECIPIENT_FAILURE`.  Returns `false` if nobody was waiting.
    pub fn fail(&self, reply_address: &str, code: i32, message: impl Into<String>) -> bool {
        match self.lock().waiters.remove(reply_address) {
            Some(waiter) => waiter.send(Err(ReplyFailure::recipient(code, message))).is_ok(),
            None => false,
        }
    }

    /// Number of live consumers of `address`.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.lock()
            .consumers
            .get(address)
            .map_or(0, |list| list.iter().filter(|c| !c.sender.is_closed()).count())
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.lock().waiters.len()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn message(address: &str, body: Value, options: DeliveryOptions, reply: Option<String>) -> BusMessage {
        BusMessage {
            address: address.to_string(),
            body,
            headers: options.headers,
            reply_address: reply,
        }
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn send(&self, address: &str, body: Value, options: DeliveryOptions) {
        let message = Self::message(address, body, options, None);
        let mut state = self.lock();
        if let Some(waiter) = state.waiters.remove(address) {
            // Nobody cares whether the requester is still waiting.
            let _ = waiter.send(Ok(message));
            return;
        }
        if !state.deliver_one(message) {
            debug!(%address, "send dropped: no handlers");
        }
    }

    async fn publish(&self, address: &str, body: Value, options: DeliveryOptions) {
        let message = Self::message(address, body, options, None);
        let delivered = self.lock().deliver_all(&message);
        trace!(%address, delivered, "published");
    }

    async fn request(
        &self,
        address: &str,
        body: Value,
        options: DeliveryOptions,
    ) -> Result<BusMessage, ReplyFailure> {
        let wait = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let reply_address = Uuid::new_v4().to_string();
        let message = Self::message(address, body, options, Some(reply_address.clone()));
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.lock();
            state.waiters.insert(reply_address.clone(), tx);
            let delivered = match state.waiters.remove(address) {
                Some(waiter) => waiter.send(Ok(message)).is_ok(),
                None => state.deliver_one(message),
            };
            if !delivered {
                state.waiters.remove(&reply_address);
                return Err(ReplyFailure::no_handlers(address));
            }
        }

        match timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplyFailure::recipient(-1, "reply handler dropped")),
            Err(_) => {
                self.lock().waiters.remove(&reply_address);
                Err(ReplyFailure::timeout(format!(
                    "Timed out after waiting {}(ms) for a reply. address: {reply_address}, repliedAddress: {address}",
                    wait.as_millis()
                )))
            }
        }
    }

    async fn subscribe(&self, address: &str) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock()
            .consumers
            .entry(address.to_string())
            .or_default()
            .push(Consumer { id, sender });
        debug!(%address, %id, "subscribed");
        Subscription {
            id,
            address: address.to_string(),
            receiver,
        }
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.lock();
        for consumers in state.consumers.values_mut() {
            consumers.retain(|c| c.id != id);
        }
        state.consumers.retain(|_, list| !list.is_empty());
        debug!(%id, "unsubscribed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
