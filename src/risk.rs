// src/risk.rs
// On-demand risk evaluation over the live behavioral state.
// Four weighted detectors, each sub-score capped at 100; the aggregate is
// uncapped and the verdict denies at the configured threshold.

use crate::behavior::{ActivityKind, RiskState};
use crate::probe::EnvironmentProbe;

const RATE_WINDOW_MS: u64 = 60_000;

const AUTOMATION_UA_MARKERS: [&str; 5] =
    ["headless", "phantom", "selenium", "puppeteer", "chromedriver"];

pub const ISSUE_AUTOMATION: &str = "Automated behavior detected";
pub const ISSUE_PATTERNS: &str = "Suspicious behavioral patterns";
pub const ISSUE_PROXY: &str = "Proxy/VPN usage detected";
pub const ISSUE_RATE_LIMIT: &str = "Rate limit exceeded";

#[derive(Debug, Clone)]
pub struct RiskVerdict {
    pub allowed: bool,
    pub risk_score: u32,
    pub issues: Vec<&'static str>,
    pub reason: Option<String>,
}

pub struct RiskContext<'a> {
    pub probe: &'a dyn EnvironmentProbe,
    pub ip: &'a str,
    pub now_ms: u64,
    pub rate_limit: u32,
    pub deny_threshold: u32,
}

/// Runs the detector battery for one access attempt. Reads the current
/// risk snapshot; the only mutation is the rate window bookkeeping for
/// this email.
pub fn evaluate(state: &mut RiskState, email: &str, ctx: &RiskContext) -> RiskVerdict {
    let mut risk_score = 0u32;
    let mut issues = Vec::new();

    let automation = automation_score(ctx.probe, state);
    if automation >= 70 {
        issues.push(ISSUE_AUTOMATION);
        risk_score += 50;
    }

    let patterns = pattern_score(state);
    if patterns > 50 {
        issues.push(ISSUE_PATTERNS);
        risk_score += 30;
    }

    let proxy = proxy_score(ctx.probe, ctx.ip);
    if proxy > 60 {
        issues.push(ISSUE_PROXY);
        risk_score += 25;
    }

    let rate = rate_limit_score(state, email, ctx.now_ms, ctx.rate_limit);
    if rate > 80 {
        issues.push(ISSUE_RATE_LIMIT);
        risk_score += 40;
    }

    let allowed = risk_score < ctx.deny_threshold;
    let reason = if issues.is_empty() {
        None
    } else {
        Some(format!("Security violation: {}", issues.join(", ")))
    };

    RiskVerdict {
        allowed,
        risk_score,
        issues,
        reason,
    }
}

/// Automation detection: hard driver/headless markers weigh 40 each,
/// softer absence signals fill in the rest, and a currently elevated
/// behavior score is itself a signal.
pub fn automation_score(probe: &dyn EnvironmentProbe, state: &RiskState) -> u32 {
    let flags = probe.automation_flags();
    let mut score = 0u32;

    if flags.webdriver {
        score += 40;
    }
    if flags.driver_shim {
        score += 40;
    }
    if flags.phantom {
        score += 40;
    }
    if flags.nightmare {
        score += 40;
    }

    if !flags.chrome_runtime {
        score += 20;
    }
    if flags.plugin_count == 0 {
        score += 15;
    }
    if probe.languages().is_empty() {
        score += 15;
    }

    let ua = probe.user_agent().to_lowercase();
    if AUTOMATION_UA_MARKERS.iter().any(|m| ua.contains(m)) {
        score += 35;
    }

    if !flags.permissions_api {
        score += 10;
    }
    if !flags.notification_api {
        score += 10;
    }

    if state.behavior_score > 100 {
        score += 30;
    }

    score.min(100)
}

/// Pattern detection over the recorded activity ledger.
pub fn pattern_score(state: &RiskState) -> u32 {
    let mut score = 0u32;
    if state.mouse_anomaly_count() > 3 {
        score += 20;
    }
    if state.activity_count(ActivityKind::RoboticTyping) > 2 {
        score += 25;
    }
    if state.activity_count(ActivityKind::RepetitiveClicks) > 2 {
        score += 15;
    }
    if state.timing_anomaly_count() > 1 {
        score += 20;
    }
    score.min(100)
}

/// Proxy heuristics: a proxy-looking address, poor connection metrics
/// when exposed, and an implausible timezone offset.
pub fn proxy_score(probe: &dyn EnvironmentProbe, ip: &str) -> u32 {
    let mut score = 0u32;
    if is_proxy_like_ip(ip) {
        score += 30;
    }
    if let Some(conn) = probe.connection() {
        if conn.rtt_ms > 300 {
            score += 15;
        }
        if conn.downlink_mbps < 1.0 {
            score += 10;
        }
    }
    if probe.timezone_offset_minutes().unsigned_abs() > 840 {
        score += 20;
    }
    score.min(100)
}

/// Private-looking prefixes plus the TEST-NET documentation blocks.
pub(crate) fn is_proxy_like_ip(ip: &str) -> bool {
    let mut parts = ip.split('.');
    let (Some(a), Some(b), Some(c)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(a), Ok(b), Ok(c)) = (a.parse::<u16>(), b.parse::<u16>(), c.parse::<u16>()) else {
        return false;
    };
    match (a, b, c) {
        (10, _, _) | (127, _, _) => true,
        (169, 254, _) => true,
        (172, 16..=31, _) => true,
        (192, 168, _) => true,
        (203, 0, 113) | (198, 51, 100) | (192, 0, 2) => true,
        _ => false,
    }
}

/// Sliding per-email window: append, filter to the trailing minute, and
/// trim the stored history once it exceeds twice the limit. The verdict
/// uses the pre-trim count, so the attempt that crosses the limit is the
/// one that pays for it.
pub fn rate_limit_score(state: &mut RiskState, email: &str, now_ms: u64, limit: u32) -> u32 {
    let attempts = state
        .access_attempts
        .entry(email.to_string())
        .or_default();
    attempts.retain(|&t| now_ms.saturating_sub(t) < RATE_WINDOW_MS);
    attempts.push(now_ms);

    let within_window = attempts.len();
    if within_window > (limit as usize) * 2 {
        let keep_from = attempts.len() - limit as usize;
        attempts.drain(..keep_from);
    }

    if within_window > limit as usize {
        100
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;

    fn ctx<'a>(probe: &'a StaticProbe, ip: &'a str, now_ms: u64) -> RiskContext<'a> {
        RiskContext {
            probe,
            ip,
            now_ms,
            rate_limit: 5,
            deny_threshold: 60,
        }
    }

    #[test]
    fn clean_session_is_allowed_with_zero_score() {
        let probe = StaticProbe::default();
        let mut state = RiskState::new();
        let verdict = evaluate(&mut state, "user@example.com", &ctx(&probe, "8.8.8.8", 1_000));
        assert!(verdict.allowed);
        assert_eq!(verdict.risk_score, 0);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn automation_alone_scores_fifty_and_passes() {
        // webdriver (40) + missing chrome runtime (20) + empty plugins (15)
        // puts automation at 75, over the 70 gate: +50 aggregate, allowed.
        let mut probe = StaticProbe::default();
        probe.automation_flags.webdriver = true;
        probe.automation_flags.chrome_runtime = false;
        probe.automation_flags.plugin_count = 0;

        let mut state = RiskState::new();
        let verdict = evaluate(&mut state, "user@example.com", &ctx(&probe, "8.8.8.8", 1_000));
        assert_eq!(verdict.risk_score, 50);
        assert!(verdict.allowed);
        assert_eq!(verdict.issues, vec![ISSUE_AUTOMATION]);
    }

    #[test]
    fn deny_threshold_is_exact_at_sixty() {
        // Automation (50) never denies alone; automation + proxy (25) does.
        let mut probe = StaticProbe::default();
        probe.automation_flags.webdriver = true;
        probe.automation_flags.driver_shim = true;
        probe.timezone_offset_minutes = 900;
        if let Some(conn) = probe.connection.as_mut() {
            conn.rtt_ms = 450;
        }

        let mut state = RiskState::new();
        let verdict = evaluate(
            &mut state,
            "user@example.com",
            &ctx(&probe, "203.0.113.9", 1_000),
        );
        // proxy sub-score: 30 (test-net) + 15 (rtt) + 20 (timezone) = 65 > 60
        assert_eq!(verdict.risk_score, 75);
        assert!(!verdict.allowed);
        let reason = verdict.reason.unwrap();
        assert!(reason.starts_with("Security violation: "));
        assert!(reason.contains(ISSUE_AUTOMATION));
        assert!(reason.contains(ISSUE_PROXY));
    }

    #[test]
    fn deny_comparison_is_inclusive_at_the_threshold() {
        // Automation alone contributes exactly 50; a score equal to the
        // threshold denies, one point under it allows.
        let mut probe = StaticProbe::default();
        probe.automation_flags.webdriver = true;
        probe.automation_flags.driver_shim = true;

        let mut state = RiskState::new();
        let mut context = ctx(&probe, "8.8.8.8", 1_000);
        context.deny_threshold = 50;
        let verdict = evaluate(&mut state, "edge@example.com", &context);
        assert_eq!(verdict.risk_score, 50);
        assert!(!verdict.allowed);

        let mut state = RiskState::new();
        context.deny_threshold = 51;
        assert!(evaluate(&mut state, "edge2@example.com", &context).allowed);
    }

    #[test]
    fn automation_subscore_caps_at_one_hundred() {
        let mut probe = StaticProbe::default();
        probe.automation_flags.webdriver = true;
        probe.automation_flags.driver_shim = true;
        probe.automation_flags.phantom = true;
        probe.automation_flags.nightmare = true;
        probe.user_agent = "HeadlessChrome/120 puppeteer".to_string();

        let state = RiskState::new();
        assert_eq!(automation_score(&probe, &state), 100);
    }

    #[test]
    fn elevated_behavior_score_feeds_automation() {
        let probe = StaticProbe::default();
        let mut state = RiskState::new();
        state.behavior_score = 101;
        assert_eq!(automation_score(&probe, &state), 30);
        state.behavior_score = 100;
        assert_eq!(automation_score(&probe, &state), 0);
    }

    #[test]
    fn pattern_score_counts_recorded_activity() {
        let mut state = RiskState::new();
        // Four mouse anomalies: two teleport+speed pairs.
        for i in 0..2u64 {
            state.observe_pointer(0.0, 0.0, i * 10_000);
            state.observe_pointer(900.0, 0.0, i * 10_000 + 2);
        }
        assert_eq!(pattern_score(&state), 20);
    }

    #[test]
    fn proxy_heuristics_accumulate() {
        let mut probe = StaticProbe::default();
        probe.timezone_offset_minutes = -900;
        if let Some(conn) = probe.connection.as_mut() {
            conn.rtt_ms = 450;
            conn.downlink_mbps = 0.4;
        }
        // 30 (test-net ip) + 15 (rtt) + 10 (downlink) + 20 (timezone)
        assert_eq!(proxy_score(&probe, "198.51.100.1"), 75);
        assert_eq!(proxy_score(&StaticProbe::default(), "8.8.8.8"), 0);
    }

    #[test]
    fn proxy_like_prefixes_match() {
        for ip in [
            "10.1.2.3",
            "127.0.0.1",
            "169.254.1.1",
            "172.20.0.5",
            "192.168.7.7",
            "203.0.113.80",
            "198.51.100.3",
            "192.0.2.44",
        ] {
            assert!(is_proxy_like_ip(ip), "{} should look like a proxy", ip);
        }
        assert!(!is_proxy_like_ip("8.8.8.8"));
        assert!(!is_proxy_like_ip("172.32.1.1"));
        assert!(!is_proxy_like_ip("not-an-ip"));
    }

    #[test]
    fn sixth_attempt_in_a_minute_trips_the_rate_limit() {
        let mut state = RiskState::new();
        for i in 0..5u64 {
            assert_eq!(
                rate_limit_score(&mut state, "a@b.com", 1_000 + i * 1_000, 5),
                0
            );
        }
        assert_eq!(rate_limit_score(&mut state, "a@b.com", 6_000, 5), 100);
        assert_eq!(rate_limit_score(&mut state, "a@b.com", 6_500, 5), 100);
    }

    #[test]
    fn spaced_attempts_never_trip_the_rate_limit() {
        let mut state = RiskState::new();
        let twenty_minutes = 20 * 60 * 1_000u64;
        for i in 0..5u64 {
            assert_eq!(
                rate_limit_score(&mut state, "a@b.com", 1_000 + i * twenty_minutes, 5),
                0
            );
        }
    }

    #[test]
    fn rate_windows_are_per_email() {
        let mut state = RiskState::new();
        for i in 0..6u64 {
            rate_limit_score(&mut state, "first@b.com", 1_000 + i, 5);
        }
        assert_eq!(rate_limit_score(&mut state, "second@b.com", 2_000, 5), 0);
    }

    #[test]
    fn stored_history_is_trimmed_at_twice_the_limit() {
        let mut state = RiskState::new();
        for i in 0..11u64 {
            rate_limit_score(&mut state, "a@b.com", 1_000 + i, 5);
        }
        let stored = state.access_attempts.get("a@b.com").unwrap();
        assert!(stored.len() <= 5);
    }
}
