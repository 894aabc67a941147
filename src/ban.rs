// src/ban.rs
// Ban list management and the access-record ledger.
// Lists live in durable storage under fixed keys as JSON arrays; all
// mutations are read-modify-write with last-writer-wins semantics.

use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::store::{self, KeyValueStore};

pub const BANNED_EMAILS_KEY: &str = "secure_banned_emails";
pub const BANNED_IPS_KEY: &str = "secure_banned_ips";
pub const ACCESS_RECORDS_KEY: &str = "secure_access_records";
/// Externally-owned signed-in user record, consulted by the autonomous
/// ban trigger and cleared on enforcement.
pub const USER_RECORD_KEY: &str = "user";

const ACCESS_RECORD_CAP: usize = 1000;

/// One granted access, appended to the capped ledger.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AccessRecord {
    pub email: String,
    pub ip: String,
    pub timestamp: u64,
    /// Fingerprint prefix only; the full hash stays out of storage.
    pub fingerprint: String,
    pub user_agent: String,
}

pub fn banned_emails(store: &impl KeyValueStore) -> Vec<String> {
    store::read_json_or_default(store, BANNED_EMAILS_KEY)
}

pub fn banned_ips(store: &impl KeyValueStore) -> Vec<String> {
    store::read_json_or_default(store, BANNED_IPS_KEY)
}

pub fn is_email_banned(store: &impl KeyValueStore, email: &str) -> bool {
    let needle = email.trim().to_lowercase();
    banned_emails(store)
        .iter()
        .any(|pattern| email_pattern_matches(pattern, &needle))
}

pub fn is_ip_banned(store: &impl KeyValueStore, ip: &str) -> bool {
    banned_ips(store)
        .iter()
        .any(|pattern| ip_pattern_matches(pattern, ip))
}

/// Case-insensitive exact match, or `*@domain` matching any address
/// ending in that domain.
pub(crate) fn email_pattern_matches(pattern: &str, normalized_email: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    if pattern == normalized_email {
        return true;
    }
    if let Some(domain) = pattern.strip_prefix("*@") {
        return normalized_email.ends_with(&format!("@{}", domain));
    }
    false
}

/// Exact match, CIDR containment, or per-octet `*` wildcards. Wildcard
/// patterns are compiled to a regex per check; the lists are small and
/// checks are attempt-scoped.
pub(crate) fn ip_pattern_matches(pattern: &str, ip: &str) -> bool {
    let pattern = pattern.trim();
    if pattern == ip {
        return true;
    }
    if pattern.contains('/') {
        if let (Ok(net), Ok(addr)) = (pattern.parse::<IpNet>(), ip.parse::<IpAddr>()) {
            return net.contains(&addr);
        }
        return false;
    }
    if pattern.contains('*') {
        let escaped = pattern.replace('.', r"\.").replace('*', r"\d+");
        if let Ok(re) = Regex::new(&format!("^{}$", escaped)) {
            return re.is_match(ip);
        }
    }
    false
}

/// Adds a pattern to the email ban list. Returns false when the entry is
/// already present or the write fails.
pub fn add_email_ban(store: &impl KeyValueStore, email: &str) -> bool {
    add_entry(store, BANNED_EMAILS_KEY, email)
}

pub fn remove_email_ban(store: &impl KeyValueStore, email: &str) -> bool {
    remove_entry(store, BANNED_EMAILS_KEY, email)
}

pub fn add_ip_ban(store: &impl KeyValueStore, ip: &str) -> bool {
    add_entry(store, BANNED_IPS_KEY, ip)
}

pub fn remove_ip_ban(store: &impl KeyValueStore, ip: &str) -> bool {
    remove_entry(store, BANNED_IPS_KEY, ip)
}

fn add_entry(store: &impl KeyValueStore, key: &str, value: &str) -> bool {
    let mut list: Vec<String> = store::read_json_or_default(store, key);
    if list.iter().any(|entry| entry == value) {
        return false;
    }
    list.push(value.to_string());
    store::write_json(store, key, &list).is_ok()
}

fn remove_entry(store: &impl KeyValueStore, key: &str, value: &str) -> bool {
    let mut list: Vec<String> = store::read_json_or_default(store, key);
    let before = list.len();
    list.retain(|entry| entry != value);
    if list.len() == before {
        return false;
    }
    store::write_json(store, key, &list).is_ok()
}

/// Appends to the access ledger, evicting the oldest entries past the
/// 1000-record cap.
pub fn record_access(store: &impl KeyValueStore, record: AccessRecord) {
    let mut records: Vec<AccessRecord> = store::read_json_or_default(store, ACCESS_RECORDS_KEY);
    records.push(record);
    if records.len() > ACCESS_RECORD_CAP {
        let excess = records.len() - ACCESS_RECORD_CAP;
        records.drain(..excess);
    }
    if store::write_json(store, ACCESS_RECORDS_KEY, &records).is_err() {
        tracing::error!("failed to persist access record");
    }
}

pub fn access_records(store: &impl KeyValueStore) -> Vec<AccessRecord> {
    store::read_json_or_default(store, ACCESS_RECORDS_KEY)
}

/// Email of the currently signed-in user, when the external record holds
/// one.
pub fn current_user_email(store: &impl KeyValueStore) -> Option<String> {
    store
        .get(USER_RECORD_KEY)
        .ok()
        .flatten()
        .and_then(|val| serde_json::from_slice::<serde_json::Value>(&val).ok())
        .and_then(|doc| doc.get("email").and_then(|e| e.as_str()).map(str::to_string))
}

pub fn clear_user(store: &impl KeyValueStore) {
    let _ = store.delete(USER_RECORD_KEY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn email_wildcard_matches_whole_domain() {
        assert!(email_pattern_matches("*@evil.com", "user@evil.com"));
        assert!(email_pattern_matches("*@evil.com", "a.b@evil.com"));
        assert!(!email_pattern_matches("*@evil.com", "user@notevil.com"));
    }

    #[test]
    fn email_exact_match_is_case_insensitive() {
        let store = MemoryStore::new();
        add_email_ban(&store, "Spammer@Evil.com");
        assert!(is_email_banned(&store, "spammer@evil.com"));
        assert!(is_email_banned(&store, "  SPAMMER@EVIL.COM "));
        assert!(!is_email_banned(&store, "other@evil.com"));
    }

    #[test]
    fn cidr_patterns_contain_their_network_only() {
        assert!(ip_pattern_matches("203.0.113.0/24", "203.0.113.55"));
        assert!(!ip_pattern_matches("203.0.113.0/24", "203.0.114.1"));
        assert!(ip_pattern_matches("10.0.0.0/8", "10.200.3.4"));
        assert!(!ip_pattern_matches("bad/cidr", "10.0.0.1"));
    }

    #[test]
    fn wildcard_patterns_match_per_octet() {
        assert!(ip_pattern_matches("192.168.*.*", "192.168.4.250"));
        assert!(!ip_pattern_matches("192.168.*.*", "192.167.4.250"));
        assert!(ip_pattern_matches("5.*.9.1", "5.77.9.1"));
        assert!(!ip_pattern_matches("5.*.9.1", "5.77.9.10"));
    }

    #[test]
    fn duplicate_bans_and_absent_removals_report_false() {
        let store = MemoryStore::new();
        assert!(add_ip_ban(&store, "1.2.3.4"));
        assert!(!add_ip_ban(&store, "1.2.3.4"));
        assert!(remove_ip_ban(&store, "1.2.3.4"));
        assert!(!remove_ip_ban(&store, "1.2.3.4"));
    }

    #[test]
    fn corrupt_list_reads_as_not_banned() {
        let store = MemoryStore::new();
        store.set(BANNED_EMAILS_KEY, b"{oops").unwrap();
        assert!(!is_email_banned(&store, "anyone@example.com"));
    }

    #[test]
    fn ledger_caps_at_one_thousand_records() {
        let store = MemoryStore::new();
        for i in 0..1001u64 {
            record_access(
                &store,
                AccessRecord {
                    email: format!("u{}@example.com", i),
                    ip: "8.8.8.8".to_string(),
                    timestamp: i,
                    fingerprint: "abcdef0123456789".to_string(),
                    user_agent: "UA".to_string(),
                },
            );
        }
        let records = access_records(&store);
        assert_eq!(records.len(), 1000);
        // The oldest entry was evicted.
        assert_eq!(records[0].email, "u1@example.com");
        assert_eq!(records[999].email, "u1000@example.com");
    }

    #[test]
    fn user_record_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(current_user_email(&store), None);
        store
            .set(USER_RECORD_KEY, br#"{"email": "me@example.com", "name": "Me"}"#)
            .unwrap();
        assert_eq!(current_user_email(&store), Some("me@example.com".to_string()));
        clear_user(&store);
        assert_eq!(current_user_email(&store), None);
    }
}
