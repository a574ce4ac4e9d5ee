//! Host-facing callbacks: the message handler and the lifecycle observer.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::bus::{BusHandle, SendReport};
use crate::Error;

/// A decrypted private message accepted by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Hex public key of the seal signer.
    pub sender: String,
    pub text: String,
    /// Rumor timestamp, not the gift wrap's.
    pub created_at: u64,
    pub gift_wrap_id: String,
    pub rumor_id: Option<String>,
}

/// Sends text back to the sender of one inbound message.
#[derive(Clone)]
pub struct ReplyHandle {
    bus: BusHandle,
    recipient: String,
}

impl ReplyHandle {
    pub(crate) fn new(bus: BusHandle, recipient: impl Into<String>) -> Self {
        Self {
            bus,
            recipient: recipient.into(),
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub async fn send(&self, text: &str) -> Result<SendReport, Error> {
        self.bus.send(&self.recipient, text).await
    }
}

/// Business logic that consumes inbound messages.
///
/// Returning an error leaves the rumor watermark untouched so nothing is
/// recorded as handled.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage, reply: ReplyHandle) -> Result<(), Error>;

    fn name(&self) -> &str {
        "MessageHandler"
    }
}

/// Error and lifecycle notifications. Called inline, so keep them cheap.
pub trait BusObserver: Send + Sync {
    fn on_error(&self, error: &Error, context: &str) {
        warn!(error = %error, context, "Nostr bus error");
    }

    fn on_connect(&self, relay: &str) {
        info!(relay, "Relay connected");
    }

    fn on_disconnect(&self, relay: &str) {
        warn!(relay, "Relay disconnected");
    }

    fn on_end_of_stored_events(&self, relay: &str) {
        debug!(relay, "End of stored events");
    }
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BusObserver for TracingObserver {}
