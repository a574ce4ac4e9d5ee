//! Process-wide ledger of gift wraps and rumors that were already handled.
//!
//! One ledger is shared by every bus in the process (see [`crate::BusRegistry`]),
//! so a gift wrap fanned out by several relays, or seen by several accounts,
//! is only handled once.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use nostr_sdk::prelude::*;
use sha2::{Digest, Sha256};

pub const DEFAULT_LEDGER_CAPACITY: usize = 20_000;
/// Share of the ledger dropped at once when the capacity is exceeded.
const EVICT_PERCENT: usize = 20;
const FINGERPRINT_CONTENT_CHARS: usize = 64;

pub fn gift_wrap_key(event_id: &str) -> String {
    format!("gw:{event_id}")
}

/// `rumor:<id>`, or a fingerprint of sender, timestamp and content prefix when
/// the relay stripped the rumor id.
pub fn rumor_key(rumor: &UnsignedEvent) -> String {
    match rumor.id {
        Some(id) => format!("rumor:{}", id.to_hex()),
        None => format!(
            "rumor:fp:{}",
            fingerprint(&rumor.pubkey.to_hex(), rumor.created_at.as_secs(), &rumor.content)
        ),
    }
}

fn fingerprint(sender: &str, created_at: u64, content: &str) -> String {
    let prefix: String = content.chars().take(FINGERPRINT_CONTENT_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(sender.as_bytes());
    hasher.update(b"|");
    hasher.update(created_at.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
struct LedgerInner {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct DedupLedger {
    capacity: usize,
    inner: Mutex<LedgerInner>,
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LedgerInner::default()),
        }
    }

    /// Test-and-set: returns `true` only for the first caller to insert `key`.
    pub fn insert_if_absent(&self, key: &str) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.keys.contains(key) {
            return false;
        }
        inner.keys.insert(key.to_string());
        inner.order.push_back(key.to_string());
        if inner.order.len() > self.capacity {
            let evict = (self.capacity * EVICT_PERCENT / 100).max(1);
            for _ in 0..evict {
                if let Some(old) = inner.order.pop_front() {
                    inner.keys.remove(&old);
                }
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.inner.lock() {
            Ok(guard) => guard.keys.contains(key),
            Err(poisoned) => poisoned.into_inner().keys.contains(key),
        }
    }

    /// Seed with already-processed gift wrap ids, oldest first.
    pub fn seed_gift_wraps<'a, I>(&self, event_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        event_ids
            .into_iter()
            .filter(|id| self.insert_if_absent(&gift_wrap_key(id)))
            .count()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
