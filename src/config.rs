// src/config.rs
// Configuration for the trust gate.
// Tunables are loaded from KV; defaults are defined in config/defaults.env.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::store::KeyValueStore;

const DEFAULTS_ENV_TEXT: &str = include_str!("../config/defaults.env");

/// Fixed key the KV-resident config document lives under.
pub const CONFIG_KEY: &str = "trustgate_config";

const DENY_THRESHOLD_MIN: u32 = 10;
const DENY_THRESHOLD_MAX: u32 = 500;
const RATE_LIMIT_MIN: u32 = 1;
const RATE_LIMIT_MAX: u32 = 1000;
const LOOKUP_TIMEOUT_MIN: u64 = 1;
const LOOKUP_TIMEOUT_MAX: u64 = 60;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_deny_threshold")]
    pub deny_threshold: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_behavior_decay")]
    pub behavior_decay: u32,
    #[serde(default = "default_auto_ban_score")]
    pub auto_ban_score: u32,
    #[serde(default = "default_lookup_timeout_seconds")]
    pub lookup_timeout_seconds: u64,
    #[serde(default = "default_reflector_timeout_seconds")]
    pub reflector_timeout_seconds: u64,
    #[serde(default = "default_devtools_gap_px")]
    pub devtools_gap_px: u32,
    #[serde(default = "default_devtools_strikes")]
    pub devtools_strikes: u32,
    #[serde(default = "default_event_log_retention_hours")]
    pub event_log_retention_hours: u64,
}

impl Config {
    /// Loads the deployment config from KV. A missing document yields the
    /// compiled-in defaults; an invalid one is logged and also falls back,
    /// so a corrupt config can never take the gate down.
    pub fn load(store: &impl KeyValueStore) -> Config {
        match store.get(CONFIG_KEY) {
            Ok(Some(val)) => match serde_json::from_slice::<Config>(&val) {
                Ok(mut cfg) => {
                    clamp_config_values(&mut cfg);
                    cfg
                }
                Err(err) => {
                    tracing::error!(%err, "stored config invalid; using defaults");
                    defaults().clone()
                }
            },
            _ => defaults().clone(),
        }
    }
}

static DEFAULTS_MAP: Lazy<HashMap<String, String>> = Lazy::new(|| {
    parse_defaults_env_map(DEFAULTS_ENV_TEXT)
        .unwrap_or_else(|err| panic!("Invalid config/defaults.env: {}", err))
});

static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| {
    let mut cfg = Config {
        deny_threshold: defaults_u32("TRUSTGATE_DENY_THRESHOLD"),
        rate_limit: defaults_u32("TRUSTGATE_RATE_LIMIT"),
        behavior_decay: defaults_u32("TRUSTGATE_BEHAVIOR_DECAY"),
        auto_ban_score: defaults_u32("TRUSTGATE_AUTO_BAN_SCORE"),
        lookup_timeout_seconds: defaults_u64("TRUSTGATE_LOOKUP_TIMEOUT_SECONDS"),
        reflector_timeout_seconds: defaults_u64("TRUSTGATE_REFLECTOR_TIMEOUT_SECONDS"),
        devtools_gap_px: defaults_u32("TRUSTGATE_DEVTOOLS_GAP_PX"),
        devtools_strikes: defaults_u32("TRUSTGATE_DEVTOOLS_STRIKES"),
        event_log_retention_hours: defaults_u64("TRUSTGATE_EVENT_LOG_RETENTION_HOURS"),
    };
    clamp_config_values(&mut cfg);
    cfg
});

pub fn defaults() -> &'static Config {
    &DEFAULT_CONFIG
}

fn clamp_config_values(cfg: &mut Config) {
    cfg.deny_threshold = cfg.deny_threshold.clamp(DENY_THRESHOLD_MIN, DENY_THRESHOLD_MAX);
    cfg.rate_limit = cfg.rate_limit.clamp(RATE_LIMIT_MIN, RATE_LIMIT_MAX);
    cfg.lookup_timeout_seconds = cfg
        .lookup_timeout_seconds
        .clamp(LOOKUP_TIMEOUT_MIN, LOOKUP_TIMEOUT_MAX);
    cfg.reflector_timeout_seconds = cfg
        .reflector_timeout_seconds
        .clamp(LOOKUP_TIMEOUT_MIN, LOOKUP_TIMEOUT_MAX);
}

fn parse_defaults_env_map(input: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for (index, raw_line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, raw_value) = line
            .split_once('=')
            .ok_or_else(|| format!("Invalid defaults line {}: missing '='", line_no))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid defaults line {}: empty key", line_no));
        }
        if !key
            .chars()
            .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_')
        {
            return Err(format!("Invalid defaults key '{}' on line {}", key, line_no));
        }

        let mut value = raw_value.trim().to_string();
        if let Some((head, _)) = value.split_once(" #") {
            value = head.trim().to_string();
        }
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn defaults_raw(key: &str) -> String {
    DEFAULTS_MAP
        .get(key)
        .cloned()
        .unwrap_or_else(|| panic!("Missing required defaults key {}", key))
}

fn defaults_u32(key: &str) -> u32 {
    defaults_raw(key)
        .trim()
        .parse::<u32>()
        .unwrap_or_else(|_| panic!("Invalid integer default for {}", key))
}

fn defaults_u64(key: &str) -> u64 {
    defaults_raw(key)
        .trim()
        .parse::<u64>()
        .unwrap_or_else(|_| panic!("Invalid integer default for {}", key))
}

fn default_deny_threshold() -> u32 {
    defaults_u32("TRUSTGATE_DENY_THRESHOLD")
}

fn default_rate_limit() -> u32 {
    defaults_u32("TRUSTGATE_RATE_LIMIT")
}

fn default_behavior_decay() -> u32 {
    defaults_u32("TRUSTGATE_BEHAVIOR_DECAY")
}

fn default_auto_ban_score() -> u32 {
    defaults_u32("TRUSTGATE_AUTO_BAN_SCORE")
}

fn default_lookup_timeout_seconds() -> u64 {
    defaults_u64("TRUSTGATE_LOOKUP_TIMEOUT_SECONDS")
}

fn default_reflector_timeout_seconds() -> u64 {
    defaults_u64("TRUSTGATE_REFLECTOR_TIMEOUT_SECONDS")
}

fn default_devtools_gap_px() -> u32 {
    defaults_u32("TRUSTGATE_DEVTOOLS_GAP_PX")
}

fn default_devtools_strikes() -> u32 {
    defaults_u32("TRUSTGATE_DEVTOOLS_STRIKES")
}

fn default_event_log_retention_hours() -> u64 {
    defaults_u64("TRUSTGATE_EVENT_LOG_RETENTION_HOURS")
}
