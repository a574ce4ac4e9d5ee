//! The per-account event bus.
//!
//! Lifecycle: `Starting -> Subscribed -> Closing -> Closed`. Every delivered
//! event runs through [`BusHandle::process_event`] on its own task, so a slow
//! handler never blocks other deliveries.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::dedup::{gift_wrap_key, rumor_key, DedupLedger};
use crate::events::{unix_timestamp, KIND_GIFT_WRAP};
use crate::gift_wrap::{is_chat_message, GiftWrapCodec, Nip17Codec};
use crate::handler::{BusObserver, InboundMessage, MessageHandler, ReplyHandle, TracingObserver};
use crate::keys::{decode_private_key, parse_public_key};
use crate::metrics::{BusMetrics, Counter, MetricsSnapshot};
use crate::state::{compute_since_timestamp, SessionState, StateStore};
use crate::transport::{RelayTransport, SubscriptionFilter, TransportNotification};
use crate::Error;

/// Rumors dated further than this past the local clock are dropped.
pub const MAX_FUTURE_SKEW_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    Starting,
    Subscribed,
    Closing,
    Closed,
}

/// Which step accepted or dropped a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Delivered,
    DuplicateGiftWrap,
    NotGiftWrap,
    UnwrapFailed,
    NotChatMessage,
    DuplicateRumor,
    SelfEcho,
    FutureRumor,
    StaleRumor,
    CallbackFailed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub relay: String,
    pub event_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub rumor_id: Option<String>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<PublishFailure>,
}

/// Collaborators injected into a bus.
#[derive(Clone)]
pub struct BusContext {
    pub transport: Arc<dyn RelayTransport>,
    pub handler: Arc<dyn MessageHandler>,
    pub codec: Arc<dyn GiftWrapCodec>,
    pub ledger: Arc<DedupLedger>,
    pub observer: Arc<dyn BusObserver>,
}

impl BusContext {
    pub fn new(transport: Arc<dyn RelayTransport>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            transport,
            handler,
            codec: Arc::new(Nip17Codec::default()),
            ledger: Arc::new(DedupLedger::new()),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<DedupLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn GiftWrapCodec>) -> Self {
        self.codec = codec;
        self
    }
}

struct BusInner {
    keys: Keys,
    public_key: PublicKey,
    account_id: String,
    relays: Vec<String>,
    ctx: BusContext,
    store: StateStore,
    session: Mutex<SessionState>,
    status: Mutex<BusStatus>,
    subscription_id: Mutex<Option<String>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    metrics: BusMetrics,
}

/// Live session for one account. Cheap to clone.
#[derive(Clone)]
pub struct BusHandle {
    inner: Arc<BusInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BusHandle {
    /// Decode keys, restore state, persist a baseline and subscribe.
    ///
    /// Only key and subscription failures are returned; everything after
    /// that is reported through the observer.
    pub async fn start(config: BusConfig, ctx: BusContext) -> Result<Self, Error> {
        let secret_key = decode_private_key(&config.private_key)?;
        let keys = Keys::new(secret_key);
        let public_key = keys.public_key();
        let account_id = config.resolve_account_id(&public_key.to_hex());

        let store = StateStore::new(config.state_dir.clone());
        let persisted = store.read(&account_id);
        let started_at = unix_timestamp();
        let since = compute_since_timestamp(persisted.as_ref(), started_at)
            .saturating_sub(config.startup_lookback.as_secs());

        let mut session = SessionState::new(started_at);
        if let Some(previous) = persisted {
            let seeded = ctx.ledger.seed_gift_wraps(&previous.recent_event_ids);
            debug!(account_id = %account_id, seeded, "Seeded dedup ledger from state");
            if previous.last_processed_at > 0 {
                session.last_processed_at = previous.last_processed_at;
            }
            session.recent_event_ids = previous.recent_event_ids;
            session.last_rumor_at = previous.last_rumor_at;
        }

        let bus = Self {
            inner: Arc::new(BusInner {
                keys,
                public_key,
                account_id,
                relays: config.relays.clone(),
                ctx,
                store,
                session: Mutex::new(session),
                status: Mutex::new(BusStatus::Starting),
                subscription_id: Mutex::new(None),
                listener: Mutex::new(None),
                metrics: BusMetrics::default(),
            }),
        };
        bus.persist_state("persist initial state");

        let filter = SubscriptionFilter {
            kinds: vec![KIND_GIFT_WRAP],
            tagged_pubkey: public_key,
            since,
        };
        let subscription = match bus
            .inner
            .ctx
            .transport
            .subscribe(&bus.inner.relays, filter)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                *lock(&bus.inner.status) = BusStatus::Closed;
                return Err(err);
            }
        };

        *lock(&bus.inner.subscription_id) = Some(subscription.id.clone());
        let listener = tokio::spawn(bus.clone().listen(subscription.notifications));
        *lock(&bus.inner.listener) = Some(listener);
        *lock(&bus.inner.status) = BusStatus::Subscribed;

        info!(
            account_id = %bus.inner.account_id,
            pubkey = %public_key,
            relays = bus.inner.relays.len(),
            since,
            "Nostr DM bus subscribed"
        );
        Ok(bus)
    }

    pub fn public_key(&self) -> String {
        self.inner.public_key.to_hex()
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    pub fn relays(&self) -> &[String] {
        &self.inner.relays
    }

    pub fn status(&self) -> BusStatus {
        *lock(&self.inner.status)
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.session).clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    async fn listen(self, mut notifications: mpsc::UnboundedReceiver<TransportNotification>) {
        let observer = self.inner.ctx.observer.clone();
        while let Some(notification) = notifications.recv().await {
            match notification {
                TransportNotification::Event { relay, event } => {
                    let bus = self.clone();
                    tokio::spawn(async move {
                        bus.process_event(&relay, &event).await;
                    });
                }
                TransportNotification::Connected { relay } => observer.on_connect(&relay),
                TransportNotification::Disconnected { relay } => observer.on_disconnect(&relay),
                TransportNotification::EndOfStoredEvents { relay } => {
                    observer.on_end_of_stored_events(&relay)
                }
                TransportNotification::Closed { relay, reason } => {
                    let err = Error::SubscriptionClosed {
                        relay: relay.clone(),
                        reason,
                    };
                    observer.on_error(&err, "subscription");
                    observer.on_disconnect(&relay);
                }
            }
        }
        debug!(account_id = %self.inner.account_id, "Relay notification stream ended");
    }

    /// Run one delivery through dedup, unwrap, filtering and the handler.
    pub async fn process_event(&self, relay: &str, event: &Event) -> EventOutcome {
        let event_id = event.id.to_hex();
        let outcome = match self.try_process(event, &event_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.inner
                    .ctx
                    .observer
                    .on_error(&err, &format!("event {event_id}"));
                EventOutcome::Failed
            }
        };
        debug!(relay, event_id = %event_id, outcome = ?outcome, "Processed gift wrap");
        outcome
    }

    async fn try_process(&self, event: &Event, event_id: &str) -> Result<EventOutcome, Error> {
        let inner = &self.inner;
        inner.metrics.incr(Counter::EventsReceived);

        if !inner.ctx.ledger.insert_if_absent(&gift_wrap_key(event_id)) {
            inner.metrics.incr(Counter::DuplicateGiftWraps);
            return Ok(EventOutcome::DuplicateGiftWrap);
        }

        if event.kind != Kind::from(KIND_GIFT_WRAP) {
            inner.metrics.incr(Counter::NonGiftWraps);
            return Ok(EventOutcome::NotGiftWrap);
        }

        let unwrapped = match inner.ctx.codec.unwrap(&inner.keys, event).await {
            Ok(unwrapped) => unwrapped,
            Err(err) => {
                inner.metrics.incr(Counter::UnwrapFailures);
                inner
                    .ctx
                    .observer
                    .on_error(&err, &format!("unwrap gift wrap {event_id}"));
                return Ok(EventOutcome::UnwrapFailed);
            }
        };
        let rumor = unwrapped.rumor;

        if !is_chat_message(&rumor) {
            inner.metrics.incr(Counter::NonChatRumors);
            return Ok(EventOutcome::NotChatMessage);
        }

        // Before the rumor key is claimed: another bus sharing the ledger
        // may be the recipient of this same rumor.
        if unwrapped.sender == inner.public_key {
            inner.metrics.incr(Counter::SelfEchoes);
            return Ok(EventOutcome::SelfEcho);
        }

        if !inner.ctx.ledger.insert_if_absent(&rumor_key(&rumor)) {
            inner.metrics.incr(Counter::DuplicateRumors);
            return Ok(EventOutcome::DuplicateRumor);
        }

        let now = unix_timestamp();
        let rumor_at = rumor.created_at.as_secs();
        if rumor_at > now + MAX_FUTURE_SKEW_SECS {
            inner.metrics.incr(Counter::FutureRumors);
            return Ok(EventOutcome::FutureRumor);
        }
        let stale = {
            let session = inner.session.lock().map_err(|_| Error::MutexPoisoned)?;
            session.is_stale_rumor(rumor_at)
        };
        if stale {
            inner.metrics.incr(Counter::StaleRumors);
            return Ok(EventOutcome::StaleRumor);
        }

        let sender = unwrapped.sender.to_hex();
        let message = InboundMessage {
            sender: sender.clone(),
            text: rumor.content.clone(),
            created_at: rumor_at,
            gift_wrap_id: event_id.to_string(),
            rumor_id: rumor.id.map(|id| id.to_hex()),
        };
        info!(
            account_id = %inner.account_id,
            sender = %sender,
            event_id = %event_id,
            "Received private message"
        );

        let reply = ReplyHandle::new(self.clone(), sender);
        if let Err(err) = inner.ctx.handler.handle(message, reply).await {
            inner.metrics.incr(Counter::CallbackFailures);
            inner
                .ctx
                .observer
                .on_error(&err, &format!("event {event_id}"));
            return Ok(EventOutcome::CallbackFailed);
        }

        {
            let mut session = inner.session.lock().map_err(|_| Error::MutexPoisoned)?;
            // Watermarks never run ahead of the local clock.
            session.advance_rumor(rumor_at.min(now));
            session.advance_processed(event.created_at.as_secs().min(now));
            session.push_recent(event_id);
            self.write_state(&session, "persist state");
        }
        inner.metrics.incr(Counter::MessagesDelivered);
        Ok(EventOutcome::Delivered)
    }

    /// Wrap `text` for `to` and publish both gift wraps to every relay.
    ///
    /// Any failed publish is reported to the observer as one aggregated
    /// error. The call itself fails only when no publish succeeded.
    pub async fn send(&self, to: &str, text: &str) -> Result<SendReport, Error> {
        let inner = &self.inner;
        let recipient = parse_public_key(to)?;
        if inner.relays.is_empty() {
            return Err(Error::Transport("no relays configured".to_string()));
        }

        let wrapped = inner.ctx.codec.wrap(&inner.keys, &recipient, text).await?;
        let transport = &inner.ctx.transport;
        let attempts = wrapped.events().into_iter().flat_map(|event| {
            inner.relays.iter().map(move |relay| async move {
                let result = transport.publish(relay, event).await;
                (relay, event, result)
            })
        });
        let results = join_all(attempts).await;

        let mut report = SendReport {
            rumor_id: wrapped.rumor.id.map(|id| id.to_hex()),
            attempted: results.len(),
            ..Default::default()
        };
        for (relay, event, result) in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(err) => report.failures.push(PublishFailure {
                    relay: relay.clone(),
                    event_id: event.id.to_hex(),
                    reason: err.to_string(),
                }),
            }
        }
        inner
            .metrics
            .add(Counter::PublishAttempts, report.attempted as u64);
        inner
            .metrics
            .add(Counter::PublishFailures, report.failures.len() as u64);

        info!(
            account_id = %inner.account_id,
            recipient = %recipient,
            attempted = report.attempted,
            succeeded = report.succeeded,
            "Sent private message"
        );

        if report.failures.is_empty() {
            return Ok(report);
        }
        let err = Error::Publish {
            succeeded: report.succeeded,
            failed: report.failures.len(),
            reasons: report
                .failures
                .iter()
                .map(|failure| format!("{} ({}): {}", failure.relay, failure.event_id, failure.reason))
                .collect(),
        };
        inner
            .ctx
            .observer
            .on_error(&err, &format!("send to {}", recipient.to_hex()));
        if report.succeeded == 0 {
            return Err(err);
        }
        Ok(report)
    }

    /// Stop the subscription and flush state. In-flight handlers are not awaited.
    pub async fn close(&self) {
        {
            let mut status = lock(&self.inner.status);
            if matches!(*status, BusStatus::Closing | BusStatus::Closed) {
                return;
            }
            *status = BusStatus::Closing;
        }

        let listener = lock(&self.inner.listener).take();
        if let Some(listener) = listener {
            listener.abort();
        }
        let subscription_id = lock(&self.inner.subscription_id).take();
        if let Some(subscription_id) = subscription_id {
            self.inner.ctx.transport.unsubscribe(&subscription_id).await;
        }

        self.persist_state("flush state on close");
        *lock(&self.inner.status) = BusStatus::Closed;
        info!(account_id = %self.inner.account_id, "Nostr DM bus closed");
    }

    fn persist_state(&self, context: &str) {
        let session = lock(&self.inner.session);
        self.write_state(&session, context);
    }

    fn write_state(&self, session: &SessionState, context: &str) {
        if let Err(err) = self.inner.store.write(&self.inner.account_id, session) {
            self.inner.metrics.incr(Counter::PersistFailures);
            warn!(account_id = %self.inner.account_id, error = %err, "State write failed");
            self.inner.ctx.observer.on_error(&err, context);
        }
    }
}
