// src/audit.rs
// Append-only security audit sink.
// Each event is written to a distinct immutable key to avoid
// read-modify-write races between concurrent sessions.

use rand::random;
use serde::{Deserialize, Serialize};

use crate::store::KeyValueStore;

const SECLOG_PREFIX: &str = "seclog";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Debug,
    Warning,
    Error,
    Security,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Security => "security",
        }
    }
}

/// One audit event. `fields` carries the free-form diagnostic payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuditEntry {
    pub ts: u64, // epoch millis
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub fields: serde_json::Value,
}

fn make_event_key(hour: u64, ts: u64) -> String {
    format!("{}:{}:{}-{:016x}", SECLOG_PREFIX, hour, ts, random::<u64>())
}

fn parse_event_hour(key: &str) -> Option<u64> {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some("seclog"), Some(hour)) => hour.parse::<u64>().ok(),
        _ => None,
    }
}

/// Fire-and-forget audit write. Failures are logged diagnostically and
/// dropped; this sink must never throw back into the caller.
pub fn log_secure(
    store: &impl KeyValueStore,
    level: LogLevel,
    message: &str,
    fields: serde_json::Value,
    now_ms: u64,
) {
    let entry = AuditEntry {
        ts: now_ms,
        level,
        message: message.to_string(),
        fields,
    };
    let key = make_event_key(now_ms / 3_600_000, now_ms);
    match serde_json::to_vec(&entry) {
        Ok(payload) => {
            if store.set(&key, &payload).is_err() {
                tracing::warn!(key, "audit sink write failed; event dropped");
            }
        }
        Err(err) => tracing::warn!(%err, "audit entry not serializable; event dropped"),
    }
}

/// Most recent audit events, oldest first, capped at `limit`.
pub fn recent_events(store: &impl KeyValueStore, limit: usize) -> Vec<AuditEntry> {
    let keys = match store.get_keys() {
        Ok(keys) => keys,
        Err(_) => return Vec::new(),
    };
    let mut events: Vec<AuditEntry> = keys
        .iter()
        .filter(|k| parse_event_hour(k).is_some())
        .filter_map(|k| store.get(k).ok().flatten())
        .filter_map(|val| serde_json::from_slice(&val).ok())
        .collect();
    events.sort_by_key(|e: &AuditEntry| e.ts);
    if events.len() > limit {
        events.drain(..events.len() - limit);
    }
    events
}

/// Deletes events older than the retention horizon. Hour-granular; a
/// retention of 0 disables the sweep.
pub fn prune_expired(store: &impl KeyValueStore, now_ms: u64, retention_hours: u64) {
    if retention_hours == 0 {
        return;
    }
    let cutoff_hour = (now_ms / 3_600_000).saturating_sub(retention_hours);
    if let Ok(keys) = store.get_keys() {
        for key in keys {
            let Some(event_hour) = parse_event_hour(&key) else {
                continue;
            };
            if event_hour < cutoff_hour {
                if let Err(err) = store.delete(&key) {
                    tracing::warn!(key, ?err, "failed deleting expired audit key");
                }
            }
        }
    }
}
