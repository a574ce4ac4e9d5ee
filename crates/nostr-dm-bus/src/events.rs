use std::time::{SystemTime, UNIX_EPOCH};

use nostr_sdk::prelude::*;

pub const KIND_GIFT_WRAP: u16 = 1059;
pub const KIND_CHAT_MESSAGE: u16 = 14;

pub const TAG_RECIPIENT: &str = "p";

/// Values of every `p` tag on an event, in tag order.
pub fn tagged_pubkeys(tags: &Tags) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| {
            let parts = tag.clone().to_vec();
            match parts.as_slice() {
                [name, value, ..] if name == TAG_RECIPIENT => Some(value.clone()),
                _ => None,
            }
        })
        .collect()
}

pub fn recipient_tag(recipient: &PublicKey) -> Tag {
    Tag::public_key(*recipient)
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_pubkeys() {
        let first = Keys::generate().public_key();
        let second = Keys::generate().public_key();
        let event = EventBuilder::new(Kind::TextNote, "hello")
            .tags(vec![
                recipient_tag(&first),
                Tag::parse(["client", "nostr-dm-bus"]).unwrap(),
                recipient_tag(&second),
            ])
            .sign_with_keys(&Keys::generate())
            .unwrap();

        assert_eq!(
            tagged_pubkeys(&event.tags),
            vec![first.to_hex(), second.to_hex()]
        );
    }

    #[test]
    fn test_kind_constants_match_sdk() {
        assert_eq!(Kind::GiftWrap.as_u16(), KIND_GIFT_WRAP);
        assert_eq!(Kind::PrivateDirectMessage.as_u16(), KIND_CHAT_MESSAGE);
    }
}
