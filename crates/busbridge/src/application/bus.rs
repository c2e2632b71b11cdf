//! The event bus seam.
//!
//! The bridge never talks to a concrete bus.  Everything it needs is expressed
//! by the [`EventBus`] trait: fire-and-forget `send`, broadcast `publish`,
//! `request` with a single reply, and address subscriptions.  The in-process
//! implementation lives in `infrastructure::local_bus`.
//!
//! # Reply addresses (for beginners)
//!
//! A request/reply exchange on a bus works by attaching a one-time *reply
//! address* to the outgoing message.  Whoever handles the message answers by
//! sending to that address.  [`EventBus::reply`] and
//! [`EventBus::reply_and_request`] are thin helpers that do exactly that for a
//! message that was received earlier.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use busbridge_core::Headers;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

// ── Messages ──────────────────────────────────────────────────────────────────

/// One message as seen by a bus consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// The address the message was sent to.
    pub address: String,
    pub body: Value,
    pub headers: Headers,
    /// Set when the sender expects an answer.
    pub reply_address: Option<String>,
}

impl BusMessage {
    pub fn new(address: impl Into<String>, body: Value) -> Self {
        Self {
            address: address.into(),
            body,
            headers: Headers::new(),
            reply_address: None,
        }
    }
}

/// Per-message options passed along with every bus primitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryOptions {
    pub headers: Headers,
    /// How long `request` waits for the reply.  `None` uses the bus default.
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            headers: Headers::new(),
            timeout: Some(timeout),
        }
    }
}

// ── Failures ──────────────────────────────────────────────────────────────────

/// Why a request did not produce a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Nobody answered within the delivery timeout.
    Timeout,
    /// Nobody was subscribed to the address.
    NoHandlers,
    /// The consumer explicitly failed the message.
    RecipientFailure,
}

impl FailureType {
    /// The name written into the client's `failureType` field.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::Timeout => "TIMEOUT",
            FailureType::NoHandlers => "NO_HANDLERS",
            FailureType::RecipientFailure => "RECIPIENT_FAILURE",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request/reply round trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{failure_type} ({code}): {message}")]
pub struct ReplyFailure {
    pub failure_type: FailureType,
    /// `-1` for bus-generated failures, application-defined otherwise.
    pub code: i32,
    pub message: String,
}

impl ReplyFailure {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            failure_type: FailureType::Timeout,
            code: -1,
            message: message.into(),
        }
    }

    pub fn no_handlers(address: &str) -> Self {
        Self {
            failure_type: FailureType::NoHandlers,
            code: -1,
            message: format!("No handlers for address {address}"),
        }
    }

    pub fn recipient(code: i32, message: impl Into<String>) -> Self {
        Self {
            failure_type: FailureType::RecipientFailure,
            code,
            message: message.into(),
        }
    }
}

// ── Subscriptions ─────────────────────────────────────────────────────────────

/// Handle identifying one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription.  Messages arrive on `receiver` until
/// [`EventBus::unsubscribe`] is called with `id`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub address: String,
    pub receiver: mpsc::UnboundedReceiver<BusMessage>,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// The four bus primitives the bridge relies on, plus reply helpers.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Point-to-point delivery to one consumer of `address`.
    async fn send(&self, address: &str, body: Value, options: DeliveryOptions);

    /// Broadcast delivery to every consumer of `address`.
    async fn publish(&self, address: &str, body: Value, options: DeliveryOptions);

    /// Point-to-point delivery that waits for a single reply.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplyFailure`] when the request times out, nobody consumes
    /// `address`, or the consumer fails the message.
    async fn request(
        &self,
        address: &str,
        body: Value,
        options: DeliveryOptions,
    ) -> Result<BusMessage, ReplyFailure>;

    async fn subscribe(&self, address: &str) -> Subscription;

    async fn unsubscribe(&self, id: SubscriptionId);

    /// Answers `original` without expecting anything back.
    ///
    /// Does nothing when `original` carries no reply address.
    async fn reply(&self, original: &BusMessage, body: Value, options: DeliveryOptions) {
        if let Some(reply_address) = &original.reply_address {
            self.send(reply_address, body, options).await;
        }
    }

    /// Answers `original` and waits for the answer to the answer.
    ///
    /// # Errors
    ///
    /// [`FailureType::NoHandlers`] when `original` carries no reply address,
    /// otherwise whatever [`EventBus::request`] reports.
    async fn reply_and_request(
        &self,
        original: &BusMessage,
        body: Value,
        options: DeliveryOptions,
    ) -> Result<BusMessage, ReplyFailure> {
        match &original.reply_address {
            Some(reply_address) => self.request(reply_address, body, options).await,
            None => Err(ReplyFailure::no_handlers(&original.address)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every `send` and answers `request` with a fixed echo.
    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(String, Value)>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn send(&self, address: &str, body: Value, _options: DeliveryOptions) {
            self.sent.lock().unwrap().push((address.to_string(), body));
        }
        async fn publish(&self, _address: &str, _body: Value, _options: DeliveryOptions) {}
        async fn request(
            &self,
            address: &str,
            body: Value,
            _options: DeliveryOptions,
        ) -> Result<BusMessage, ReplyFailure> {
            self.requested.lock().unwrap().push(address.to_string());
            Ok(BusMessage::new(address, body))
        }
        async fn subscribe(&self, address: &str) -> Subscription {
            let (_tx, receiver) = mpsc::unbounded_channel();
            Subscription {
                id: SubscriptionId(0),
                address: address.to_string(),
                receiver,
            }
        }
        async fn unsubscribe(&self, _id: SubscriptionId) {}
    }

    #[test]
    fn test_failure_type_names() {
        assert_eq!(FailureType::Timeout.as_str(), "TIMEOUT");
        assert_eq!(FailureType::NoHandlers.as_str(), "NO_HANDLERS");
        assert_eq!(FailureType::RecipientFailure.as_str(), "RECIPIENT_FAILURE");
    }

    #[test]
    fn test_bus_generated_failures_use_code_minus_one() {
        assert_eq!(ReplyFailure::timeout("t").code, -1);
        assert_eq!(ReplyFailure::no_handlers("a").code, -1);
        assert_eq!(ReplyFailure::recipient(42, "boom").code, 42);
    }

    #[test]
    fn test_reply_failure_display_includes_type_and_message() {
        let failure = ReplyFailure::recipient(7, "bad input");
        assert_eq!(failure.to_string(), "RECIPIENT_FAILURE (7): bad input");
    }

    #[tokio::test]
    async fn test_reply_sends_to_the_original_reply_address() {
        // Arrange
        let bus = RecordingBus::default();
        let mut original = BusMessage::new("svc", Value::Null);
        original.reply_address = Some("r-1".to_string());

        // Act
        bus.reply(&original, serde_json::json!("ok"), DeliveryOptions::default())
            .await;

        // Assert
        let sent = bus.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[("r-1".to_string(), serde_json::json!("ok"))]);
    }

    #[tokio::test]
    async fn test_reply_without_reply_address_is_a_no_op() {
        let bus = RecordingBus::default();
        let original = BusMessage::new("svc", Value::Null);

        bus.reply(&original, Value::Null, DeliveryOptions::default()).await;

        assert!(bus.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_and_request_targets_the_reply_address() {
        let bus = RecordingBus::default();
        let mut original = BusMessage::new("svc", Value::Null);
        original.reply_address = Some("r-2".to_string());

        let answer = bus
            .reply_and_request(&original, serde_json::json!(1), DeliveryOptions::default())
            .await
            .unwrap();

        assert_eq!(answer.address, "r-2");
        assert_eq!(bus.requested.lock().unwrap().as_slice(), &["r-2".to_string()]);
    }

    #[tokio::test]
    async fn test_reply_and_request_without_reply_address_fails_with_no_handlers() {
        let bus = RecordingBus::default();
        let original = BusMessage::new("svc", Value::Null);

        let err = bus
            .reply_and_request(&original, Value::Null, DeliveryOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.failure_type, FailureType::NoHandlers);
    }
}
