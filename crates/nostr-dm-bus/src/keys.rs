//! Conversions between bech32 (`nsec`/`npub`) and raw 32-byte hex keys.

use nostr_sdk::prelude::*;

use crate::Error;

const HEX_KEY_LEN: usize = 64;
const NSEC_PREFIX: &str = "nsec1";
const NPUB_PREFIX: &str = "npub1";

/// Decode a private key given as `nsec1...` or 64 hex characters.
pub fn decode_private_key(input: &str) -> Result<SecretKey, Error> {
    let trimmed = input.trim();
    if trimmed.starts_with(NSEC_PREFIX) {
        return SecretKey::from_bech32(trimmed)
            .map_err(|err| Error::InvalidKeyFormat(format!("bad nsec: {err}")));
    }
    if is_hex_key(trimmed) {
        return SecretKey::from_hex(&trimmed.to_ascii_lowercase())
            .map_err(|err| Error::InvalidKeyFormat(format!("bad hex private key: {err}")));
    }
    Err(Error::InvalidKeyFormat(
        "private key must be nsec1... or 64 hex chars".to_string(),
    ))
}

/// Derive the hex public key for a private key.
pub fn derive_public_key(secret_key: &SecretKey) -> String {
    Keys::new(secret_key.clone()).public_key().to_hex()
}

/// Normalize `npub1...` or hex input to lowercase 64-char hex.
pub fn normalize_public_key(input: &str) -> Result<String, Error> {
    parse_public_key(input).map(|key| key.to_hex())
}

pub fn parse_public_key(input: &str) -> Result<PublicKey, Error> {
    let trimmed = input.trim();
    if trimmed.starts_with(NPUB_PREFIX) {
        return PublicKey::from_bech32(trimmed)
            .map_err(|err| Error::InvalidKeyFormat(format!("bad npub: {err}")));
    }
    if is_hex_key(trimmed) {
        return PublicKey::from_hex(&trimmed.to_ascii_lowercase())
            .map_err(|err| Error::InvalidKeyFormat(format!("bad hex public key: {err}")));
    }
    Err(Error::InvalidKeyFormat(
        "public key must be npub1... or 64 hex chars".to_string(),
    ))
}

pub fn is_valid_public_key(input: &str) -> bool {
    parse_public_key(input).is_ok()
}

/// Encode a hex public key as `npub1...` for display.
pub fn encode_public_key(hex_key: &str) -> Result<String, Error> {
    let key = parse_public_key(hex_key)?;
    key.to_bech32()
        .map_err(|err| Error::InvalidKeyFormat(format!("npub encoding failed: {err}")))
}

fn is_hex_key(value: &str) -> bool {
    value.len() == HEX_KEY_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_and_nsec_decode_to_same_key() {
        let keys = Keys::generate();
        let hex_key = keys.secret_key().to_secret_hex();
        let nsec = keys.secret_key().to_bech32().unwrap();

        let from_hex = decode_private_key(&hex_key).unwrap();
        let from_upper = decode_private_key(&hex_key.to_uppercase()).unwrap();
        let from_nsec = decode_private_key(&nsec).unwrap();

        assert_eq!(from_hex, from_nsec);
        assert_eq!(from_hex, from_upper);
        assert_eq!(derive_public_key(&from_hex), keys.public_key().to_hex());
    }

    #[test]
    fn test_derive_public_key_is_deterministic() {
        let keys = Keys::generate();
        let first = derive_public_key(keys.secret_key());
        let second = derive_public_key(keys.secret_key());
        assert_eq!(first, second);
        assert_eq!(first.len(), HEX_KEY_LEN);
    }

    #[test]
    fn test_invalid_private_keys_rejected() {
        let npub = Keys::generate().public_key().to_bech32().unwrap();
        for input in [
            "",
            "abc",
            &"g".repeat(64),
            &"a".repeat(63),
            &"a".repeat(65),
            "nsec1notreallyakey",
            npub.as_str(),
        ] {
            assert!(
                matches!(decode_private_key(input), Err(Error::InvalidKeyFormat(_))),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_normalize_roundtrip() {
        let keys = Keys::generate();
        let hex_key = keys.public_key().to_hex();
        let npub = encode_public_key(&hex_key).unwrap();
        assert!(npub.starts_with(NPUB_PREFIX));

        for input in [hex_key.clone(), hex_key.to_uppercase(), npub.clone()] {
            let normalized = normalize_public_key(&input).unwrap();
            assert_eq!(normalized, hex_key);
            let again = normalize_public_key(&encode_public_key(&normalized).unwrap()).unwrap();
            assert_eq!(again, normalized);
        }
    }

    #[test]
    fn test_is_valid_public_key() {
        let keys = Keys::generate();
        let nsec = keys.secret_key().to_bech32().unwrap();
        assert!(is_valid_public_key(&keys.public_key().to_hex()));
        assert!(is_valid_public_key(&keys.public_key().to_bech32().unwrap()));
        assert!(!is_valid_public_key(""));
        assert!(!is_valid_public_key("npub1xyz"));
        assert!(!is_valid_public_key(&nsec));
        assert!(!is_valid_public_key(&"z".repeat(64)));
    }
}
