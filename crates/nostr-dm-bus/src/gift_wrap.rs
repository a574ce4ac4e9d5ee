//! NIP-17 envelope codec.
//!
//! ```text
//!  rumor (kind 14, unsigned)          plaintext body, `p` = recipient
//!    └─ seal (kind 13)                NIP-44 to recipient, signed by sender
//!         └─ gift wrap (kind 1059)    NIP-44 to recipient, signed by a one-shot key
//! ```
//!
//! Layer construction and timestamp tweaking come from the SDK's NIP-59
//! builders. The outer `created_at` carries no ordering information.

use async_trait::async_trait;
use nostr_sdk::nostr::nips::nip59::UnwrappedGift;
use nostr_sdk::prelude::*;

use crate::events::{KIND_CHAT_MESSAGE, KIND_GIFT_WRAP};
use crate::Error;

/// A decrypted rumor and the identity that signed its seal.
#[derive(Debug, Clone)]
pub struct UnwrappedRumor {
    pub sender: PublicKey,
    pub rumor: UnsignedEvent,
}

/// The two gift wraps produced for one outbound message.
#[derive(Debug, Clone)]
pub struct WrappedMessage {
    pub rumor: UnsignedEvent,
    pub to_recipient: Event,
    pub to_sender: Event,
}

impl WrappedMessage {
    pub fn events(&self) -> [&Event; 2] {
        [&self.to_recipient, &self.to_sender]
    }
}

#[async_trait]
pub trait GiftWrapCodec: Send + Sync {
    /// Wrap `body` for `recipient`, plus a copy readable by the sender.
    async fn wrap(
        &self,
        sender: &Keys,
        recipient: &PublicKey,
        body: &str,
    ) -> Result<WrappedMessage, Error>;

    async fn unwrap(&self, receiver: &Keys, gift_wrap: &Event) -> Result<UnwrappedRumor, Error>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Nip17Codec;

impl Nip17Codec {
    pub fn new() -> Self {
        Self
    }

    pub fn build_rumor(
        sender: &PublicKey,
        recipient: &PublicKey,
        body: &str,
        created_at: Timestamp,
    ) -> UnsignedEvent {
        let mut rumor = EventBuilder::private_msg_rumor(*recipient, body)
            .custom_created_at(created_at)
            .build(*sender);
        rumor.ensure_id();
        rumor
    }

    pub async fn seal(
        &self,
        sender: &Keys,
        recipient: &PublicKey,
        rumor: &UnsignedEvent,
    ) -> Result<Event, Error> {
        EventBuilder::seal(sender, recipient, rumor.clone())
            .await
            .map_err(|err| Error::Wrap(format!("seal encryption: {err}")))?
            .sign_with_keys(sender)
            .map_err(|err| Error::Wrap(format!("seal signing: {err}")))
    }

    /// Wrap a seal under a freshly generated key.
    pub fn gift_wrap(&self, recipient: &PublicKey, seal: &Event) -> Result<Event, Error> {
        EventBuilder::gift_wrap_from_seal(recipient, seal, [])
            .map_err(|err| Error::Wrap(format!("gift wrap: {err}")))
    }

    async fn wrap_for(
        &self,
        sender: &Keys,
        target: &PublicKey,
        rumor: &UnsignedEvent,
    ) -> Result<Event, Error> {
        let seal = self.seal(sender, target, rumor).await?;
        self.gift_wrap(target, &seal)
    }
}

#[async_trait]
impl GiftWrapCodec for Nip17Codec {
    async fn wrap(
        &self,
        sender: &Keys,
        recipient: &PublicKey,
        body: &str,
    ) -> Result<WrappedMessage, Error> {
        let rumor = Self::build_rumor(&sender.public_key(), recipient, body, Timestamp::now());
        let to_recipient = self.wrap_for(sender, recipient, &rumor).await?;
        let to_sender = self.wrap_for(sender, &sender.public_key(), &rumor).await?;
        Ok(WrappedMessage {
            rumor,
            to_recipient,
            to_sender,
        })
    }

    async fn unwrap(&self, receiver: &Keys, gift_wrap: &Event) -> Result<UnwrappedRumor, Error> {
        if gift_wrap.kind != Kind::from(KIND_GIFT_WRAP) {
            return Err(Error::Unwrap(format!(
                "expected kind {KIND_GIFT_WRAP}, got {}",
                gift_wrap.kind.as_u16()
            )));
        }
        gift_wrap
            .verify()
            .map_err(|err| Error::Unwrap(format!("gift wrap signature: {err}")))?;

        let UnwrappedGift { sender, rumor } = UnwrappedGift::from_gift_wrap(receiver, gift_wrap)
            .await
            .map_err(|err| Error::Unwrap(err.to_string()))?;
        if rumor.pubkey != sender {
            return Err(Error::Unwrap(
                "rumor author does not match seal signer".to_string(),
            ));
        }

        Ok(UnwrappedRumor { sender, rumor })
    }
}

/// True for the rumor kind the bus delivers.
pub fn is_chat_message(rumor: &UnsignedEvent) -> bool {
    rumor.kind == Kind::from(KIND_CHAT_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{tagged_pubkeys, unix_timestamp};

    const TWO_DAYS: u64 = 2 * 24 * 60 * 60;

    #[tokio::test]
    async fn test_wrap_produces_recipient_and_self_copies() {
        let codec = Nip17Codec::new();
        let sender = Keys::generate();
        let recipient = Keys::generate();

        let wrapped = codec
            .wrap(&sender, &recipient.public_key(), "hello there")
            .await
            .unwrap();

        for event in wrapped.events() {
            assert_eq!(event.kind, Kind::GiftWrap);
            assert_ne!(event.pubkey, sender.public_key());
            assert!(event.verify().is_ok());
        }
        assert_ne!(wrapped.to_recipient.pubkey, wrapped.to_sender.pubkey);
        assert_eq!(
            tagged_pubkeys(&wrapped.to_recipient.tags),
            vec![recipient.public_key().to_hex()]
        );
        assert_eq!(
            tagged_pubkeys(&wrapped.to_sender.tags),
            vec![sender.public_key().to_hex()]
        );
        assert!(is_chat_message(&wrapped.rumor));
        assert!(wrapped.rumor.id.is_some());
    }

    #[tokio::test]
    async fn test_recipient_and_sender_unwrap_same_rumor() {
        let codec = Nip17Codec::new();
        let sender = Keys::generate();
        let recipient = Keys::generate();
        let wrapped = codec
            .wrap(&sender, &recipient.public_key(), "same rumor")
            .await
            .unwrap();

        let inbound = codec.unwrap(&recipient, &wrapped.to_recipient).await.unwrap();
        let echo = codec.unwrap(&sender, &wrapped.to_sender).await.unwrap();

        assert_eq!(inbound.sender, sender.public_key());
        assert_eq!(inbound.rumor.content, "same rumor");
        assert_eq!(inbound.rumor.id, echo.rumor.id);
        assert_eq!(echo.sender, sender.public_key());
    }

    #[tokio::test]
    async fn test_unwrap_by_third_party_fails() {
        let codec = Nip17Codec::new();
        let sender = Keys::generate();
        let recipient = Keys::generate();
        let stranger = Keys::generate();
        let wrapped = codec
            .wrap(&sender, &recipient.public_key(), "secret")
            .await
            .unwrap();

        let result = codec.unwrap(&stranger, &wrapped.to_recipient).await;
        assert!(matches!(result, Err(Error::Unwrap(_))));
    }

    #[tokio::test]
    async fn test_unwrap_rejects_non_gift_wrap() {
        let codec = Nip17Codec::new();
        let keys = Keys::generate();
        let note = EventBuilder::text_note("plain")
            .sign_with_keys(&keys)
            .unwrap();

        assert!(matches!(
            codec.unwrap(&keys, &note).await,
            Err(Error::Unwrap(_))
        ));
    }

    #[tokio::test]
    async fn test_outer_timestamp_sits_in_recent_past() {
        let codec = Nip17Codec::new();
        let sender = Keys::generate();
        let recipient = Keys::generate();
        let before = unix_timestamp();
        let wrapped = codec
            .wrap(&sender, &recipient.public_key(), "when")
            .await
            .unwrap();
        let after = unix_timestamp();

        for event in wrapped.events() {
            let ts = event.created_at.as_secs();
            assert!(ts <= after);
            assert!(ts + TWO_DAYS >= before);
        }
        assert!(wrapped.rumor.created_at.as_secs() >= before);
    }
}
