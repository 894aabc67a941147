// src/gate.rs
// Access gate orchestration.
// Composes the fingerprint and IP identity once, consults the live risk
// state and the ban lists on every attempt, and fails closed: no error
// anywhere on the check path escapes as anything but a denial.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use crate::audit::{self, LogLevel};
use crate::ban::{self, AccessRecord};
use crate::behavior::{ActivityKind, FocusTransition, RiskState};
use crate::config::Config;
use crate::enforcement::{self, DenialNotice};
use crate::fingerprint;
use crate::identity::IdentityResolver;
use crate::probe::EnvironmentProbe;
use crate::risk::{self, RiskContext};
use crate::store::KeyValueStore;

const FINGERPRINT_PREFIX_LEN: usize = 16;

const EMAIL_BAN_REASON: &str = "Your email address has been banned from this website.";
const IP_BAN_REASON: &str = "Your IP address has been banned from this website.";
const AUTO_BAN_REASON: &str =
    "Automated security system has detected suspicious behavior patterns.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Uninitialized,
    Resolving,
    Ready,
}

/// Stable identity signals for the session. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub ip: String,
    pub fingerprint: String,
}

/// Failures that surface on the access-check path. Both resolve to a
/// denial; the split selects the audit level. Resolution failures never
/// appear here (the fallback chain absorbs them at debug level), and
/// storage corruption is absorbed where it is read.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid email input")]
    Validation,
    #[error("access evaluation failed: {0}")]
    Evaluation(String),
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct AccessGate<S: KeyValueStore, P: EnvironmentProbe> {
    store: S,
    probe: P,
    config: Config,
    resolver: IdentityResolver,
    state: GateState,
    fingerprint: Option<String>,
    ip: Option<String>,
    risk: RiskState,
    sign_out: Option<Box<dyn FnMut()>>,
    last_denial: Option<DenialNotice>,
}

impl<S: KeyValueStore, P: EnvironmentProbe> AccessGate<S, P> {
    pub fn new(store: S, probe: P, resolver: IdentityResolver) -> Self {
        let config = Config::load(&store);
        AccessGate {
            store,
            probe,
            config,
            resolver,
            state: GateState::Uninitialized,
            fingerprint: None,
            ip: None,
            risk: RiskState::new(),
            sign_out: None,
            last_denial: None,
        }
    }

    /// Registers the external sign-out callback invoked on enforcement.
    pub fn with_sign_out(mut self, callback: Box<dyn FnMut()>) -> Self {
        self.sign_out = Some(callback);
        self
    }

    /// Resolves the session identity. Runs once; the fingerprint and IP
    /// are immutable for the rest of the session (the IP is re-resolved
    /// lazily only if this step could not produce one).
    pub fn init(&mut self) {
        self.init_at(now_ms());
    }

    pub fn init_at(&mut self, now_ms: u64) {
        if self.state == GateState::Ready {
            return;
        }
        self.state = GateState::Resolving;
        let fingerprint = fingerprint::compose_fingerprint(&self.probe);
        let ip = self.resolver.resolve(&self.probe);
        audit::log_secure(
            &self.store,
            LogLevel::Info,
            "Ban system initialized",
            json!({
                "ip": ip,
                "fingerprint": prefix(&fingerprint),
            }),
            now_ms,
        );
        self.fingerprint = Some(fingerprint);
        self.ip = Some(ip);
        self.state = GateState::Ready;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        match (&self.ip, &self.fingerprint) {
            (Some(ip), Some(fingerprint)) => Some(SessionIdentity {
                ip: ip.clone(),
                fingerprint: fingerprint.clone(),
            }),
            _ => None,
        }
    }

    pub fn last_denial(&self) -> Option<&DenialNotice> {
        self.last_denial.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk
    }

    /// The single entry point: true grants access, false denies it.
    /// Never panics and never propagates an internal failure.
    pub fn check_user_access(&mut self, email: &str) -> bool {
        self.check_user_access_at(email, now_ms())
    }

    pub fn check_user_access_at(&mut self, email: &str, now_ms: u64) -> bool {
        match self.check_user_access_inner(email, now_ms) {
            Ok(allowed) => allowed,
            Err(err) => {
                let (level, message) = match &err {
                    GateError::Validation => {
                        (LogLevel::Warning, "Invalid email provided for access check")
                    }
                    GateError::Evaluation(_) => (LogLevel::Error, "Access check error"),
                };
                audit::log_secure(
                    &self.store,
                    level,
                    message,
                    json!({ "email": email, "error": err.to_string() }),
                    now_ms,
                );
                false
            }
        }
    }

    fn check_user_access_inner(&mut self, email: &str, now_ms: u64) -> Result<bool, GateError> {
        if !is_plausible_email(email) {
            return Err(GateError::Validation);
        }

        if self.state != GateState::Ready {
            self.init_at(now_ms);
        }
        // Resolution can only have been skipped, never failed; refresh
        // lazily if the session somehow reached here without an address.
        let ip = match &self.ip {
            Some(ip) => ip.clone(),
            None => {
                let ip = self.resolver.resolve(&self.probe);
                self.ip = Some(ip.clone());
                ip
            }
        };
        let fingerprint = self
            .fingerprint
            .clone()
            .ok_or_else(|| GateError::Evaluation("fingerprint missing after init".to_string()))?;

        audit::log_secure(
            &self.store,
            LogLevel::Info,
            "User access check initiated",
            json!({
                "email": email,
                "ip": ip,
                "fingerprint": prefix(&fingerprint),
            }),
            now_ms,
        );

        let verdict = {
            let ctx = RiskContext {
                probe: &self.probe,
                ip: &ip,
                now_ms,
                rate_limit: self.config.rate_limit,
                deny_threshold: self.config.deny_threshold,
            };
            risk::evaluate(&mut self.risk, email, &ctx)
        };
        if !verdict.allowed {
            audit::log_secure(
                &self.store,
                LogLevel::Security,
                "Security check failed",
                json!({
                    "email": email,
                    "riskScore": verdict.risk_score,
                    "issues": verdict.issues,
                }),
                now_ms,
            );
            let reason = verdict
                .reason
                .unwrap_or_else(|| "Security violation".to_string());
            self.deny(&reason, email, &ip, now_ms);
            return Ok(false);
        }

        if ban::is_email_banned(&self.store, email) {
            audit::log_secure(
                &self.store,
                LogLevel::Security,
                "Banned email attempted access",
                json!({ "email": email, "ip": ip }),
                now_ms,
            );
            self.deny(EMAIL_BAN_REASON, email, &ip, now_ms);
            return Ok(false);
        }

        if ban::is_ip_banned(&self.store, &ip) {
            audit::log_secure(
                &self.store,
                LogLevel::Security,
                "Banned IP attempted access",
                json!({ "email": email, "ip": ip }),
                now_ms,
            );
            self.deny(IP_BAN_REASON, email, &ip, now_ms);
            return Ok(false);
        }

        ban::record_access(
            &self.store,
            AccessRecord {
                email: email.to_string(),
                ip: ip.clone(),
                timestamp: now_ms,
                fingerprint: prefix(&fingerprint),
                user_agent: self.probe.user_agent(),
            },
        );
        audit::log_secure(
            &self.store,
            LogLevel::Info,
            "User access granted",
            json!({ "email": email, "ip": ip }),
            now_ms,
        );
        Ok(true)
    }

    fn deny(&mut self, reason: &str, email: &str, ip: &str, now_ms: u64) {
        let notice =
            enforcement::enforce_ban(&self.store, &mut self.sign_out, reason, email, ip, now_ms);
        self.last_denial = Some(notice);
    }

    // ── Observation entry points ────────────────────────────────────────
    // Wired to the host's event sources; each takes the event timestamp so
    // the detectors never reach for an ambient clock.

    pub fn observe_pointer(&mut self, x: f64, y: f64, now_ms: u64) {
        let flagged = self.risk.observe_pointer(x, y, now_ms);
        self.audit_flags(&flagged, now_ms);
    }

    pub fn observe_keypress(&mut self, now_ms: u64) {
        let flagged = self.risk.observe_keypress(now_ms);
        self.audit_flags(&flagged, now_ms);
    }

    pub fn observe_click(&mut self, x: f64, y: f64, now_ms: u64) {
        let flagged = self.risk.observe_click(x, y, now_ms);
        self.audit_flags(&flagged, now_ms);
    }

    pub fn observe_focus(&mut self, transition: FocusTransition, now_ms: u64) {
        let flagged = self.risk.observe_focus(transition, now_ms);
        self.audit_flags(&flagged, now_ms);
    }

    fn audit_flags(&self, flagged: &[ActivityKind], now_ms: u64) {
        for kind in flagged {
            audit::log_secure(
                &self.store,
                LogLevel::Warning,
                "Suspicious activity detected",
                json!({ "type": kind.as_str() }),
                now_ms,
            );
        }
    }

    // ── Periodic work ───────────────────────────────────────────────────
    // The host scheduler drives both ticks every 30 seconds for the
    // lifetime of the session.

    /// Decay tick. Fires the autonomous ban first when the score is over
    /// the threshold: a best-effort side trigger against the external
    /// `user` record, independent of any explicit access check.
    pub fn behavior_tick(&mut self) {
        self.behavior_tick_at(now_ms());
    }

    pub fn behavior_tick_at(&mut self, now_ms: u64) {
        if self.risk.behavior_score > self.config.auto_ban_score {
            if let Some(email) = ban::current_user_email(&self.store) {
                let ip = self.ip.clone().unwrap_or_default();
                self.deny(AUTO_BAN_REASON, &email, &ip, now_ms);
            }
        }
        self.risk.decay(self.config.behavior_decay);
        audit::prune_expired(&self.store, now_ms, self.config.event_log_retention_hours);
    }

    /// Inspector probe tick: compares outer and inner window dimensions.
    pub fn devtools_tick(&mut self) {
        self.devtools_tick_at(now_ms());
    }

    pub fn devtools_tick_at(&mut self, now_ms: u64) {
        let metrics = self.probe.window_metrics();
        let flagged = self.risk.observe_window_gap(
            metrics,
            self.config.devtools_gap_px,
            self.config.devtools_strikes,
            now_ms,
        );
        self.audit_flags(&flagged, now_ms);
    }

    // ── Dashboard surface ───────────────────────────────────────────────

    pub fn security_stats(&self) -> crate::admin::SecurityStats {
        crate::admin::security_stats(&self.store, &self.risk)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

fn prefix(fingerprint: &str) -> String {
    fingerprint.chars().take(FINGERPRINT_PREFIX_LEN).collect()
}

/// Shallow shape check. The gate scores abuse; it does not police RFC
/// 5322, so anything with a local part, one `@`, and a sane length is
/// allowed through to the real checks.
pub(crate) fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
}
