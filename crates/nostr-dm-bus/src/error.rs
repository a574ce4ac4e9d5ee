use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),
    #[error("gift wrap unwrap failed: {0}")]
    Unwrap(String),
    #[error("gift wrap construction failed: {0}")]
    Wrap(String),
    #[error("message handler failed: {0}")]
    Callback(String),
    #[error("failed to persist state to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("publish failed on {failed} attempts ({succeeded} succeeded): {}", .reasons.join("; "))]
    Publish {
        succeeded: usize,
        failed: usize,
        reasons: Vec<String>,
    },
    #[error("subscription closed by {relay}: {reason}")]
    SubscriptionClosed { relay: String, reason: String },
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("serde json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing env var: {0}")]
    MissingEnv(&'static str),
    #[error("bus already running for account {0}")]
    AccountActive(String),
    #[error("mutex poisoned")]
    MutexPoisoned,
}

impl Error {
    pub fn callback(reason: impl std::fmt::Display) -> Self {
        Self::Callback(reason.to_string())
    }
}

impl From<nostr_sdk::client::Error> for Error {
    fn from(err: nostr_sdk::client::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
