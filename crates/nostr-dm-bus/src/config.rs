use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::Error;

pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://nos.lol"];
pub const DEFAULT_STATE_DIR: &str = "./data/nostr-dm-bus";
/// Gift wrap timestamps can sit up to two days in the past.
pub const DEFAULT_STARTUP_LOOKBACK: Duration = Duration::from_secs(2 * 24 * 60 * 60);
const DERIVED_ACCOUNT_ID_LEN: usize = 16;

#[derive(Clone)]
pub struct BusConfig {
    /// `nsec1...` or 64 hex chars.
    pub private_key: String,
    pub account_id: Option<String>,
    pub relays: Vec<String>,
    pub state_dir: PathBuf,
    pub startup_lookback: Duration,
}

impl std::fmt::Debug for BusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConfig")
            .field("private_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("relays", &self.relays)
            .field("state_dir", &self.state_dir)
            .field("startup_lookback", &self.startup_lookback)
            .finish()
    }
}

impl BusConfig {
    pub fn new(private_key: impl Into<String>, relays: Vec<String>) -> Self {
        Self {
            private_key: private_key.into(),
            account_id: None,
            relays,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            startup_lookback: DEFAULT_STARTUP_LOOKBACK,
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn from_env() -> Result<Self, Error> {
        let private_key =
            env::var("NOSTR_PRIVATE_KEY").map_err(|_| Error::MissingEnv("NOSTR_PRIVATE_KEY"))?;
        let relays = env::var("NOSTR_RELAYS")
            .map(|value| parse_relays(&value))
            .unwrap_or_default();

        let mut config = Self::new(private_key, or_default_relays(relays));
        if let Ok(account_id) = env::var("NOSTR_ACCOUNT_ID") {
            config.account_id = Some(account_id);
        }
        if let Ok(state_dir) = env::var("NOSTR_STATE_DIR") {
            config.state_dir = PathBuf::from(state_dir);
        }
        Ok(config)
    }

    /// Explicit id, else a prefix of the account's hex public key.
    pub fn resolve_account_id(&self, public_key_hex: &str) -> String {
        match self.account_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => public_key_hex
                .chars()
                .take(DERIVED_ACCOUNT_ID_LEN)
                .collect(),
        }
    }
}

pub fn default_relays() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|relay| relay.to_string()).collect()
}

pub fn or_default_relays(relays: Vec<String>) -> Vec<String> {
    if relays.is_empty() {
        default_relays()
    } else {
        relays
    }
}

pub fn parse_relays(value: &str) -> Vec<String> {
    value
        .split(',')
        .flat_map(|chunk| chunk.split_whitespace())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relays() {
        let relays = parse_relays("wss://a.example, wss://b.example\nwss://c.example,,");
        assert_eq!(
            relays,
            vec!["wss://a.example", "wss://b.example", "wss://c.example"]
        );
        assert!(parse_relays("  , ").is_empty());
    }

    #[test]
    fn test_default_relays_when_empty() {
        assert_eq!(or_default_relays(Vec::new()), default_relays());
        assert_eq!(
            or_default_relays(vec!["wss://x".to_string()]),
            vec!["wss://x".to_string()]
        );
    }

    #[test]
    fn test_resolve_account_id() {
        let pubkey = "ab".repeat(32);
        let config = BusConfig::new("key", vec![]);
        assert_eq!(config.resolve_account_id(&pubkey), "abababababababab");

        let explicit = config.clone().with_account_id("work");
        assert_eq!(explicit.resolve_account_id(&pubkey), "work");

        let blank = BusConfig::new("key", vec![]).with_account_id("  ");
        assert_eq!(blank.resolve_account_id(&pubkey), "abababababababab");
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let config = BusConfig::new("nsec1supersecret", vec![]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("supersecret"));
    }
}
