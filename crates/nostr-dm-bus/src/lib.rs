//! NIP-17 private direct message bus for Nostr.
//!
//! This crate subscribes to gift-wrapped events addressed to one account,
//! unwraps them into chat rumors, drops duplicates and replays, and hands the
//! surviving messages to a host [`MessageHandler`]. Replies are wrapped and
//! fanned out to every configured relay. Per-account cursors are persisted so
//! a restart resumes where the previous session stopped.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         NOSTR-DM-BUS                              │
//! │                                                                   │
//! │  ┌──────────────────┐   events    ┌──────────────────────────┐    │
//! │  │  RelayTransport  │ ──────────▶ │        BusHandle         │    │
//! │  │  (relay pool)    │ ◀────────── │                          │    │
//! │  └──────────────────┘   publish   │ - dedup (DedupLedger)    │    │
//! │                                   │ - unwrap (GiftWrapCodec) │    │
//! │                                   │ - cursors (StateStore)   │    │
//! │                                   └────────────┬─────────────┘    │
//! │                                                │                  │
//! │                                                ▼                  │
//! │                                         MessageHandler            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Event Kinds
//!
//! | Kind | Constant | Purpose |
//! |------|----------|---------|
//! | 1059 | `KIND_GIFT_WRAP` | Outer envelope, signed by an ephemeral key |
//! | 13 | (seal) | Sender-signed envelope around the rumor |
//! | 14 | `KIND_CHAT_MESSAGE` | Unsigned chat message (the rumor) |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nostr_dm_bus::{BusConfig, BusContext, BusRegistry, NostrPoolTransport};
//!
//! let config = BusConfig::from_env()?;
//! let transport = NostrPoolTransport::connect(&config.relays).await?;
//! let registry = BusRegistry::new();
//! let bus = registry
//!     .start(config, BusContext::new(Arc::new(transport), Arc::new(MyHandler)))
//!     .await?;
//! bus.send("npub1...", "hello").await?;
//! registry.stop_all().await;
//! ```

mod bus;
mod config;
mod dedup;
mod error;
mod events;
mod gift_wrap;
mod handler;
mod keys;
mod metrics;
mod registry;
mod state;
mod transport;

pub use bus::{
    BusContext, BusHandle, BusStatus, EventOutcome, PublishFailure, SendReport,
    MAX_FUTURE_SKEW_SECS,
};
pub use config::{
    default_relays, or_default_relays, parse_relays, BusConfig, DEFAULT_RELAYS,
    DEFAULT_STARTUP_LOOKBACK, DEFAULT_STATE_DIR,
};
pub use dedup::{gift_wrap_key, rumor_key, DedupLedger, DEFAULT_LEDGER_CAPACITY};
pub use error::Error;
pub use events::{
    recipient_tag, tagged_pubkeys, unix_timestamp, KIND_CHAT_MESSAGE, KIND_GIFT_WRAP,
    TAG_RECIPIENT,
};
pub use gift_wrap::{
    is_chat_message, GiftWrapCodec, Nip17Codec, UnwrappedRumor, WrappedMessage,
};
pub use handler::{BusObserver, InboundMessage, MessageHandler, ReplyHandle, TracingObserver};
pub use keys::{
    decode_private_key, derive_public_key, encode_public_key, is_valid_public_key,
    normalize_public_key, parse_public_key,
};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use registry::BusRegistry;
pub use state::{
    compute_since_timestamp, SessionState, StateStore, MAX_RECENT_EVENT_IDS, STATE_VERSION,
};
pub use transport::{
    NostrPoolTransport, RelayTransport, Subscription, SubscriptionFilter, TransportNotification,
};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
