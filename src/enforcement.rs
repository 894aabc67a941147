// src/enforcement.rs
// Ban enforcement and the denial payload surfaced to the presentation
// layer. Enforcement is side-effectful but infallible: every step absorbs
// its own errors so a failed wipe can never un-deny the attempt.

use serde::Serialize;
use serde_json::json;

use crate::audit::{self, LogLevel};
use crate::ban;
use crate::fingerprint::to_base36;
use crate::store::KeyValueStore;

/// Keys under this prefix hold session-scoped state and are wiped on
/// enforcement, alongside the externally-owned user record.
pub const SESSION_KEY_PREFIX: &str = "session:";

/// Data contract for the blocking denial notice. Rendering is the
/// presentation layer's concern.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DenialNotice {
    pub reason: String,
    /// "SBN-" + uppercase base-36 of the denial timestamp.
    pub ban_id: String,
    /// RFC 3339 rendering of the denial timestamp.
    pub timestamp: String,
}

pub fn make_ban_id(now_ms: u64) -> String {
    format!("SBN-{}", to_base36(now_ms).to_uppercase())
}

fn clear_session_storage(store: &impl KeyValueStore) {
    if let Ok(keys) = store.get_keys() {
        for key in keys {
            if key.starts_with(SESSION_KEY_PREFIX) {
                let _ = store.delete(&key);
            }
        }
    }
}

fn rfc3339(now_ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(now_ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Runs the enforcement sequence: optional sign-out callback, removal of
/// the externally-owned user record, and a security audit event. Returns
/// the denial payload for the presentation layer.
pub(crate) fn enforce_ban(
    store: &impl KeyValueStore,
    sign_out: &mut Option<Box<dyn FnMut()>>,
    reason: &str,
    email: &str,
    ip: &str,
    now_ms: u64,
) -> DenialNotice {
    if let Some(callback) = sign_out.as_mut() {
        callback();
    }
    ban::clear_user(store);
    clear_session_storage(store);

    let notice = DenialNotice {
        reason: reason.to_string(),
        ban_id: make_ban_id(now_ms),
        timestamp: rfc3339(now_ms),
    };

    audit::log_secure(
        store,
        LogLevel::Security,
        "User banned and removed",
        json!({
            "reason": reason,
            "email": email,
            "ip": ip,
            "banId": notice.ban_id,
        }),
        now_ms,
    );

    notice
}
