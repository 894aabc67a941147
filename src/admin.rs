// src/admin.rs
// Dashboard-facing management surface: reasoned ban mutations and the
// security statistics snapshot.

use serde::Serialize;
use serde_json::json;

use crate::audit::{self, AuditEntry, LogLevel};
use crate::ban;
use crate::behavior::{Activity, RiskState};
use crate::store::KeyValueStore;

const RECENT_EVENTS: usize = 10;
const RECENT_ACTIVITIES: usize = 5;

/// Bans an email pattern. Returns false for duplicates so dashboards can
/// surface a no-op distinctly.
pub fn add_email_ban(
    store: &impl KeyValueStore,
    email: &str,
    reason: Option<&str>,
    now_ms: u64,
) -> bool {
    if !ban::add_email_ban(store, email) {
        return false;
    }
    audit::log_secure(
        store,
        LogLevel::Security,
        "Email banned",
        json!({ "email": email, "reason": reason.unwrap_or("Manual ban") }),
        now_ms,
    );
    true
}

pub fn remove_email_ban(store: &impl KeyValueStore, email: &str, now_ms: u64) -> bool {
    if !ban::remove_email_ban(store, email) {
        return false;
    }
    audit::log_secure(
        store,
        LogLevel::Info,
        "Email ban removed",
        json!({ "email": email }),
        now_ms,
    );
    true
}

pub fn add_ip_ban(store: &impl KeyValueStore, ip: &str, reason: Option<&str>, now_ms: u64) -> bool {
    if !ban::add_ip_ban(store, ip) {
        return false;
    }
    audit::log_secure(
        store,
        LogLevel::Security,
        "IP banned",
        json!({ "ip": ip, "reason": reason.unwrap_or("Manual ban") }),
        now_ms,
    );
    true
}

pub fn remove_ip_ban(store: &impl KeyValueStore, ip: &str, now_ms: u64) -> bool {
    if !ban::remove_ip_ban(store, ip) {
        return false;
    }
    audit::log_secure(
        store,
        LogLevel::Info,
        "IP ban removed",
        json!({ "ip": ip }),
        now_ms,
    );
    true
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStats {
    pub total_banned_emails: usize,
    pub total_banned_ips: usize,
    pub total_access_attempts: usize,
    pub recent_security_events: Vec<AuditEntry>,
    pub current_behavior_score: u32,
    pub suspicious_activities: Vec<Activity>,
}

pub fn security_stats(store: &impl KeyValueStore, risk: &RiskState) -> SecurityStats {
    SecurityStats {
        total_banned_emails: ban::banned_emails(store).len(),
        total_banned_ips: ban::banned_ips(store).len(),
        total_access_attempts: ban::access_records(store).len(),
        recent_security_events: audit::recent_events(store, RECENT_EVENTS),
        current_behavior_score: risk.behavior_score,
        suspicious_activities: risk.recent_activities(RECENT_ACTIVITIES),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn mutations_audit_and_report_duplicates() {
        let store = MemoryStore::new();
        assert!(add_email_ban(&store, "spam@evil.com", Some("abuse"), 1_000));
        assert!(!add_email_ban(&store, "spam@evil.com", Some("abuse"), 2_000));
        assert!(add_ip_ban(&store, "203.0.113.0/24", None, 3_000));

        let events = audit::recent_events(&store, 10);
        // One event per successful mutation; the duplicate logged nothing.
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.level == LogLevel::Security));

        assert!(remove_email_ban(&store, "spam@evil.com", 4_000));
        assert!(!remove_email_ban(&store, "spam@evil.com", 5_000));
    }

    #[test]
    fn stats_snapshot_reflects_lists_ledger_and_state() {
        let store = MemoryStore::new();
        add_email_ban(&store, "a@evil.com", None, 1_000);
        add_ip_ban(&store, "9.9.9.9", None, 2_000);
        ban::record_access(
            &store,
            ban::AccessRecord {
                email: "ok@example.com".to_string(),
                ip: "8.8.8.8".to_string(),
                timestamp: 3_000,
                fingerprint: "abc".to_string(),
                user_agent: "UA".to_string(),
            },
        );

        let mut risk = RiskState::new();
        risk.behavior_score = 42;

        let stats = security_stats(&store, &risk);
        assert_eq!(stats.total_banned_emails, 1);
        assert_eq!(stats.total_banned_ips, 1);
        assert_eq!(stats.total_access_attempts, 1);
        assert_eq!(stats.current_behavior_score, 42);
        assert!(stats.recent_security_events.len() >= 2);
        assert!(stats.suspicious_activities.is_empty());
    }
}
