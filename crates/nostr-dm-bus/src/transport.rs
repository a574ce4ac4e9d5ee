//! Relay pool seam between the bus and the network.
//!
//! Reconnects, per-relay retries and socket lifetimes belong to the transport;
//! the bus only consumes the notification stream and issues publishes.

use std::collections::HashSet;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub kinds: Vec<u16>,
    /// Matches events carrying a `p` tag for this key.
    pub tagged_pubkey: PublicKey,
    /// Inclusive lower bound on `created_at`.
    pub since: u64,
}

impl SubscriptionFilter {
    pub fn to_filter(&self) -> Filter {
        Filter::new()
            .kinds(self.kinds.iter().copied().map(Kind::from))
            .pubkey(self.tagged_pubkey)
            .since(Timestamp::from(self.since))
    }
}

#[derive(Debug, Clone)]
pub enum TransportNotification {
    Connected { relay: String },
    Disconnected { relay: String },
    Event { relay: String, event: Box<Event> },
    EndOfStoredEvents { relay: String },
    Closed { relay: String, reason: String },
}

pub struct Subscription {
    pub id: String,
    pub notifications: mpsc::UnboundedReceiver<TransportNotification>,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn subscribe(
        &self,
        relays: &[String],
        filter: SubscriptionFilter,
    ) -> Result<Subscription, Error>;

    async fn unsubscribe(&self, subscription_id: &str);

    /// Publish one event to one relay.
    async fn publish(&self, relay: &str, event: &Event) -> Result<(), Error>;
}

/// [`RelayTransport`] backed by the `nostr-sdk` relay pool.
#[derive(Clone)]
pub struct NostrPoolTransport {
    client: Client,
}

impl NostrPoolTransport {
    pub async fn connect(relays: &[String]) -> Result<Self, Error> {
        let client = Client::default();
        for relay in relays {
            client.add_relay(relay).await?;
        }
        client.connect().await;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn connected_relays(&self) -> Vec<String> {
        self.client
            .relays()
            .await
            .into_iter()
            .filter(|(_, relay)| relay.is_connected())
            .map(|(url, _)| url.to_string())
            .collect()
    }
}

#[async_trait]
impl RelayTransport for NostrPoolTransport {
    async fn subscribe(
        &self,
        relays: &[String],
        filter: SubscriptionFilter,
    ) -> Result<Subscription, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut notifications = self.client.notifications();

        let output = self
            .client
            .subscribe_to(relays.iter().map(String::as_str), filter.to_filter(), None)
            .await?;
        let subscription_id = output.val;
        info!(
            subscription_id = %subscription_id,
            relays = relays.len(),
            since = filter.since,
            "Subscribed to relays"
        );

        for relay in self.connected_relays().await {
            let _ = tx.send(TransportNotification::Connected { relay });
        }

        let known: HashSet<String> = relays.iter().cloned().collect();
        let sub_id = subscription_id.clone();
        tokio::spawn(async move {
            loop {
                let notification = match notifications.recv().await {
                    Ok(notification) => notification,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Relay notification stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let forwarded = match notification {
                    RelayPoolNotification::Event {
                        relay_url,
                        subscription_id,
                        event,
                    } if subscription_id == sub_id => Some(TransportNotification::Event {
                        relay: relay_url.to_string(),
                        event,
                    }),
                    RelayPoolNotification::Message { relay_url, message } => match message {
                        RelayMessage::EndOfStoredEvents(id) if *id == sub_id => {
                            Some(TransportNotification::EndOfStoredEvents {
                                relay: relay_url.to_string(),
                            })
                        }
                        RelayMessage::Closed {
                            subscription_id,
                            message,
                        } if *subscription_id == sub_id => {
                            Some(TransportNotification::Closed {
                                relay: relay_url.to_string(),
                                reason: message.to_string(),
                            })
                        }
                        _ => None,
                    },
                    RelayPoolNotification::Shutdown => {
                        for relay in &known {
                            let _ = tx.send(TransportNotification::Disconnected {
                                relay: relay.clone(),
                            });
                        }
                        break;
                    }
                    _ => None,
                };

                if let Some(forwarded) = forwarded {
                    if tx.send(forwarded).is_err() {
                        debug!("Subscription receiver dropped; stopping relay forwarder");
                        break;
                    }
                }
            }
        });

        Ok(Subscription {
            id: subscription_id.to_string(),
            notifications: rx,
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) {
        let id = SubscriptionId::new(subscription_id);
        self.client.unsubscribe(&id).await;
    }

    async fn publish(&self, relay: &str, event: &Event) -> Result<(), Error> {
        let output = self.client.send_event_to([relay], event).await?;
        if let Some((url, reason)) = output.failed.iter().next() {
            return Err(Error::Transport(format!("{url}: {reason}")));
        }
        if output.success.is_empty() {
            return Err(Error::Transport(format!("{relay}: no acknowledgement")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_conversion() {
        let pubkey = Keys::generate().public_key();
        let filter = SubscriptionFilter {
            kinds: vec![crate::KIND_GIFT_WRAP],
            tagged_pubkey: pubkey,
            since: 1_700_000_000,
        };

        let sdk = filter.to_filter();
        let json = serde_json::to_value(&sdk).unwrap();
        assert_eq!(json["kinds"][0], 1059);
        assert_eq!(json["#p"][0], pubkey.to_hex());
        assert_eq!(json["since"], 1_700_000_000u64);
    }
}
