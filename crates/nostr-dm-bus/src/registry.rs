//! Owns the process-wide dedup ledger and the set of running buses.

use std::collections::HashMap;
use std::sync::Arc;

use nostr_sdk::prelude::*;
use tokio::sync::Mutex;
use tracing::info;

use crate::bus::{BusContext, BusHandle};
use crate::config::BusConfig;
use crate::dedup::DedupLedger;
use crate::keys::decode_private_key;
use crate::Error;

#[derive(Default)]
pub struct BusRegistry {
    ledger: Arc<DedupLedger>,
    buses: Mutex<HashMap<String, BusHandle>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: Arc<DedupLedger>) -> Self {
        Self {
            ledger,
            buses: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> Arc<DedupLedger> {
        self.ledger.clone()
    }

    /// Start a bus that shares this registry's ledger.
    ///
    /// Fails with [`Error::AccountActive`] if the account already has a bus.
    pub async fn start(&self, config: BusConfig, ctx: BusContext) -> Result<BusHandle, Error> {
        let secret_key = decode_private_key(&config.private_key)?;
        let account_id = config.resolve_account_id(&Keys::new(secret_key).public_key().to_hex());

        let mut buses = self.buses.lock().await;
        if buses.contains_key(&account_id) {
            return Err(Error::AccountActive(account_id));
        }
        let bus = BusHandle::start(config, ctx.with_ledger(self.ledger.clone())).await?;
        buses.insert(account_id.clone(), bus.clone());
        info!(account_id = %account_id, running = buses.len(), "Registered bus");
        Ok(bus)
    }

    pub async fn get(&self, account_id: &str) -> Option<BusHandle> {
        self.buses.lock().await.get(account_id).cloned()
    }

    pub async fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = self.buses.lock().await.keys().cloned().collect();
        accounts.sort();
        accounts
    }

    /// Close and forget one bus. Returns `false` if it was not running.
    pub async fn stop(&self, account_id: &str) -> bool {
        let bus = self.buses.lock().await.remove(account_id);
        match bus {
            Some(bus) => {
                bus.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let buses: Vec<BusHandle> = self.buses.lock().await.drain().map(|(_, bus)| bus).collect();
        for bus in buses {
            bus.close().await;
        }
    }
}
