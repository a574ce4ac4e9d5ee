use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct BusMetrics {
    events_received: AtomicU64,
    duplicate_gift_wraps: AtomicU64,
    non_gift_wraps: AtomicU64,
    unwrap_failures: AtomicU64,
    non_chat_rumors: AtomicU64,
    duplicate_rumors: AtomicU64,
    self_echoes: AtomicU64,
    future_rumors: AtomicU64,
    stale_rumors: AtomicU64,
    messages_delivered: AtomicU64,
    callback_failures: AtomicU64,
    persist_failures: AtomicU64,
    publish_attempts: AtomicU64,
    publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub duplicate_gift_wraps: u64,
    pub non_gift_wraps: u64,
    pub unwrap_failures: u64,
    pub non_chat_rumors: u64,
    pub duplicate_rumors: u64,
    pub self_echoes: u64,
    pub future_rumors: u64,
    pub stale_rumors: u64,
    pub messages_delivered: u64,
    pub callback_failures: u64,
    pub persist_failures: u64,
    pub publish_attempts: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    EventsReceived,
    DuplicateGiftWraps,
    NonGiftWraps,
    UnwrapFailures,
    NonChatRumors,
    DuplicateRumors,
    SelfEchoes,
    FutureRumors,
    StaleRumors,
    MessagesDelivered,
    CallbackFailures,
    PersistFailures,
    PublishAttempts,
    PublishFailures,
}

impl BusMetrics {
    pub(crate) fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub(crate) fn add(&self, counter: Counter, value: u64) {
        self.counter(counter).fetch_add(value, Ordering::Relaxed);
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::EventsReceived => &self.events_received,
            Counter::DuplicateGiftWraps => &self.duplicate_gift_wraps,
            Counter::NonGiftWraps => &self.non_gift_wraps,
            Counter::UnwrapFailures => &self.unwrap_failures,
            Counter::NonChatRumors => &self.non_chat_rumors,
            Counter::DuplicateRumors => &self.duplicate_rumors,
            Counter::SelfEchoes => &self.self_echoes,
            Counter::FutureRumors => &self.future_rumors,
            Counter::StaleRumors => &self.stale_rumors,
            Counter::MessagesDelivered => &self.messages_delivered,
            Counter::CallbackFailures => &self.callback_failures,
            Counter::PersistFailures => &self.persist_failures,
            Counter::PublishAttempts => &self.publish_attempts,
            Counter::PublishFailures => &self.publish_failures,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            events_received: load(&self.events_received),
            duplicate_gift_wraps: load(&self.duplicate_gift_wraps),
            non_gift_wraps: load(&self.non_gift_wraps),
            unwrap_failures: load(&self.unwrap_failures),
            non_chat_rumors: load(&self.non_chat_rumors),
            duplicate_rumors: load(&self.duplicate_rumors),
            self_echoes: load(&self.self_echoes),
            future_rumors: load(&self.future_rumors),
            stale_rumors: load(&self.stale_rumors),
            messages_delivered: load(&self.messages_delivered),
            callback_failures: load(&self.callback_failures),
            persist_failures: load(&self.persist_failures),
            publish_attempts: load(&self.publish_attempts),
            publish_failures: load(&self.publish_failures),
        }
    }
}
