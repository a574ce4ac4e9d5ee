use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Error;

pub const STATE_VERSION: u32 = 2;
pub const MAX_RECENT_EVENT_IDS: usize = 5000;

/// Per-account cursor record, rewritten wholesale on every persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub last_processed_at: u64,
    #[serde(default)]
    pub gateway_started_at: u64,
    /// Oldest first.
    #[serde(default)]
    pub recent_event_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rumor_at: Option<u64>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl SessionState {
    pub fn new(gateway_started_at: u64) -> Self {
        Self {
            version: STATE_VERSION,
            last_processed_at: gateway_started_at,
            gateway_started_at,
            recent_event_ids: Vec::new(),
            last_rumor_at: None,
        }
    }

    /// Move the watermark forward; never backwards.
    pub fn advance_processed(&mut self, created_at: u64) {
        self.last_processed_at = self.last_processed_at.max(created_at);
    }

    pub fn advance_rumor(&mut self, created_at: u64) {
        self.last_rumor_at = Some(self.last_rumor_at.map_or(created_at, |t| t.max(created_at)));
    }

    pub fn push_recent(&mut self, event_id: impl Into<String>) {
        self.recent_event_ids.push(event_id.into());
        truncate_front(&mut self.recent_event_ids, MAX_RECENT_EVENT_IDS);
    }

    pub fn is_stale_rumor(&self, created_at: u64) -> bool {
        self.last_rumor_at.is_some_and(|t| created_at <= t)
    }
}

fn truncate_front(ids: &mut Vec<String>, cap: usize) {
    if ids.len() > cap {
        let excess = ids.len() - cap;
        ids.drain(..excess);
    }
}

/// The persisted watermark if any, else the gateway start time.
pub fn compute_since_timestamp(state: Option<&SessionState>, gateway_started_at: u64) -> u64 {
    match state {
        Some(state) if state.last_processed_at > 0 => state.last_processed_at,
        _ => gateway_started_at,
    }
}

/// One JSON file per account under a shared directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, account_id: &str) -> PathBuf {
        self.dir
            .join(format!("bus-state-{}.json", sanitize_account_id(account_id)))
    }

    /// Missing or unreadable records are treated as "no prior state".
    pub fn read(&self, account_id: &str) -> Option<SessionState> {
        let path = self.path_for(account_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to read bus state");
                return None;
            }
        };

        match serde_json::from_slice::<SessionState>(&bytes) {
            Ok(mut state) => {
                truncate_front(&mut state.recent_event_ids, MAX_RECENT_EVENT_IDS);
                Some(state)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Ignoring corrupt bus state");
                None
            }
        }
    }

    pub fn write(&self, account_id: &str, state: &SessionState) -> Result<(), Error> {
        let path = self.path_for(account_id);
        let persist_err = |source: std::io::Error| Error::Persist {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(persist_err)?;
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(persist_err)?;
        fs::rename(&tmp, &path).map_err(persist_err)?;

        debug!(
            account_id,
            last_processed_at = state.last_processed_at,
            recent = state.recent_event_ids.len(),
            "Persisted bus state"
        );
        Ok(())
    }
}

fn sanitize_account_id(account_id: &str) -> String {
    account_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> StateStore {
        let dir = std::env::temp_dir().join(format!(
            "nostr_dm_bus_state_{}_{}_{}",
            name,
            std::process::id(),
            crate::unix_timestamp()
        ));
        let _ = fs::remove_dir_all(&dir);
        StateStore::new(dir)
    }

    #[test]
    fn test_read_missing_is_none() {
        let store = temp_store("missing");
        assert!(store.read("acct").is_none());
    }

    #[test]
    fn test_write_creates_dir_and_roundtrips() {
        let store = temp_store("roundtrip");
        let mut state = SessionState::new(100);
        state.advance_processed(150);
        state.push_recent("abc");
        state.advance_rumor(120);

        store.write("acct", &state).unwrap();
        assert!(store.dir().is_dir());
        assert_eq!(store.read("acct"), Some(state));
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_write_replaces_record() {
        let store = temp_store("replace");
        let mut state = SessionState::new(10);
        state.push_recent("first");
        store.write("acct", &state).unwrap();

        let replacement = SessionState::new(20);
        store.write("acct", &replacement).unwrap();

        let loaded = store.read("acct").unwrap();
        assert!(loaded.recent_event_ids.is_empty());
        assert_eq!(loaded.gateway_started_at, 20);
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_corrupt_record_is_none() {
        let store = temp_store("corrupt");
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.path_for("acct"), b"{not json").unwrap();
        assert!(store.read("acct").is_none());
        let _ = fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_json_field_names() {
        let mut state = SessionState::new(5);
        state.push_recent("id-1");
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["lastProcessedAt"], 5);
        assert_eq!(value["gatewayStartedAt"], 5);
        assert_eq!(value["recentEventIds"][0], "id-1");
        assert!(value.get("lastRumorAt").is_none());

        let legacy: SessionState =
            serde_json::from_str(r#"{"lastProcessedAt": 7, "recentEventIds": ["x"]}"#).unwrap();
        assert_eq!(legacy.version, STATE_VERSION);
        assert_eq!(legacy.last_processed_at, 7);
        assert_eq!(legacy.last_rumor_at, None);
    }

    #[test]
    fn test_recent_ids_capped_keeping_newest() {
        let mut state = SessionState::new(0);
        for i in 0..(MAX_RECENT_EVENT_IDS + 25) {
            state.push_recent(format!("id-{i}"));
        }
        assert_eq!(state.recent_event_ids.len(), MAX_RECENT_EVENT_IDS);
        assert_eq!(state.recent_event_ids[0], "id-25");
        assert_eq!(
            state.recent_event_ids.last().map(String::as_str),
            Some(format!("id-{}", MAX_RECENT_EVENT_IDS + 24).as_str())
        );
    }

    #[test]
    fn test_watermarks_are_monotonic() {
        let mut state = SessionState::new(100);
        state.advance_processed(50);
        assert_eq!(state.last_processed_at, 100);
        state.advance_rumor(90);
        state.advance_rumor(80);
        assert_eq!(state.last_rumor_at, Some(90));
        assert!(state.is_stale_rumor(90));
        assert!(!state.is_stale_rumor(91));
    }

    #[test]
    fn test_compute_since_timestamp() {
        let state = SessionState {
            last_processed_at: 500,
            ..SessionState::new(0)
        };
        assert_eq!(compute_since_timestamp(Some(&state), 900), 500);
        assert_eq!(compute_since_timestamp(None, 900), 900);
        assert_eq!(compute_since_timestamp(Some(&SessionState::new(0)), 900), 900);
    }

    #[test]
    fn test_account_id_sanitized() {
        let store = StateStore::new("/tmp/x");
        let path = store.path_for("../evil/acct");
        assert_eq!(path.file_name().unwrap(), "bus-state-___evil_acct.json");
    }
}
