// src/identity.rs
// Best-effort public IP resolution for the session.
// Ordered external lookups, a peer-connection side channel, and a
// deterministic synthetic fallback. Resolution never fails: some
// syntactically valid, non-private IPv4 address always comes back.

use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use reqwest::header::ACCEPT;
use sha2::{Digest, Sha256};

use crate::config;
use crate::fingerprint::browser_fingerprint;
use crate::probe::EnvironmentProbe;

// Private, loopback, and link-local networks, rejected by the public-IP
// validator via prefix-mask arithmetic.
const PRIVATE_RANGES: [([u8; 4], u32); 5] = [
    ([10, 0, 0, 0], 8),
    ([172, 16, 0, 0], 12),
    ([192, 168, 0, 0], 16),
    ([127, 0, 0, 0], 8),
    ([169, 254, 0, 0], 16),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Json { field: &'static str },
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct LookupEndpoint {
    pub url: &'static str,
    pub kind: ResponseKind,
}

/// External lookup chain, highest preference first.
pub const LOOKUP_ENDPOINTS: [LookupEndpoint; 4] = [
    LookupEndpoint {
        url: "https://api.ipify.org?format=json",
        kind: ResponseKind::Json { field: "ip" },
    },
    LookupEndpoint {
        url: "https://checkip.amazonaws.com",
        kind: ResponseKind::Text,
    },
    LookupEndpoint {
        url: "https://ipecho.net/plain",
        kind: ResponseKind::Text,
    },
    LookupEndpoint {
        url: "https://icanhazip.com",
        kind: ResponseKind::Text,
    },
];

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("unparseable response body")]
    Malformed,
}

pub trait IpLookup {
    fn fetch(&self, endpoint: &LookupEndpoint, timeout: Duration) -> Result<String, LookupError>;
}

/// HTTP implementation of the lookup chain.
pub struct HttpIpLookup {
    client: reqwest::blocking::Client,
}

impl HttpIpLookup {
    pub fn new() -> Result<Self, LookupError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        Ok(HttpIpLookup { client })
    }
}

impl IpLookup for HttpIpLookup {
    fn fetch(&self, endpoint: &LookupEndpoint, timeout: Duration) -> Result<String, LookupError> {
        let accept = match endpoint.kind {
            ResponseKind::Json { .. } => "application/json",
            ResponseKind::Text => "text/plain",
        };
        let resp = self
            .client
            .get(endpoint.url)
            .header(ACCEPT, accept)
            .timeout(timeout)
            .send()
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(LookupError::Status(resp.status().as_u16()));
        }
        let body = resp.text().map_err(|_| LookupError::Malformed)?;
        match endpoint.kind {
            ResponseKind::Json { field } => {
                let value: serde_json::Value =
                    serde_json::from_str(&body).map_err(|_| LookupError::Malformed)?;
                value
                    .get(field)
                    .or_else(|| value.get("ip"))
                    .or_else(|| value.get("origin"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or(LookupError::Malformed)
            }
            ResponseKind::Text => Ok(body.trim().to_string()),
        }
    }
}

/// Peer-connection side channel: surfaces a raw candidate string from
/// which an address may be extracted. `None` when nothing arrived within
/// the budget or the surface has no peer stack.
pub trait PeerReflector {
    fn reflect(&self, timeout: Duration) -> Option<String>;
}

/// Reflector for surfaces without a peer-connection stack.
pub struct NullReflector;

impl PeerReflector for NullReflector {
    fn reflect(&self, _timeout: Duration) -> Option<String> {
        None
    }
}

static CANDIDATE_IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\d{1,3}\.){3}\d{1,3}").expect("candidate pattern"));

pub(crate) fn extract_candidate_ipv4(candidate: &str) -> Option<String> {
    CANDIDATE_IPV4
        .find(candidate)
        .map(|m| m.as_str().to_string())
}

fn parse_ipv4(ip: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in ip.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return None;
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        octets[count] = part.parse::<u8>().ok()?;
        count += 1;
    }
    (count == 4).then_some(octets)
}

/// True for syntactically valid IPv4 addresses outside the private,
/// loopback, and link-local ranges.
pub fn is_valid_public_ipv4(ip: &str) -> bool {
    let Some(octets) = parse_ipv4(ip) else {
        return false;
    };
    let addr = u32::from_be_bytes(octets);
    for (network, prefix) in PRIVATE_RANGES {
        let mask = u32::MAX << (32 - prefix);
        if addr & mask == u32::from_be_bytes(network) & mask {
            return false;
        }
    }
    true
}

/// Deterministic pseudo-IP for the session: same seed and secret always
/// produce the same address, and the address always passes the public
/// validator. The first octet walks 1..=223 until the check passes, so
/// the retry is bounded.
pub fn synthetic_session_ip(seed: &str, secret: &str) -> String {
    let digest = Sha256::digest(format!("{}{}{}", seed, COMBINE_DELIMITER, secret).as_bytes());
    let h = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

    let mut first = h % 223 + 1;
    let second = (h >> 8) & 0xff;
    let third = (h >> 16) & 0xff;
    let fourth = (h >> 24) % 254 + 1;

    for _ in 0..=223 {
        let ip = format!("{}.{}.{}.{}", first, second, third, fourth);
        if is_valid_public_ipv4(&ip) {
            return ip;
        }
        first = (first + 1) % 223 + 1;
    }
    // Unreachable: every cycle of the walk passes through octet 1.
    format!("1.{}.{}.{}", second, third, fourth)
}

const COMBINE_DELIMITER: &str = "|";

pub(crate) fn generate_instance_secret() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Resolves a public IP through the prioritized chain. The chain is
/// sequential with a per-attempt timeout: a slow earlier endpoint delays
/// the result but cannot corrupt it.
pub struct IdentityResolver {
    lookup: Box<dyn IpLookup>,
    reflector: Box<dyn PeerReflector>,
    lookup_timeout: Duration,
    reflector_timeout: Duration,
    instance_secret: String,
}

impl IdentityResolver {
    pub fn new(lookup: Box<dyn IpLookup>, reflector: Box<dyn PeerReflector>) -> Self {
        let cfg = config::defaults();
        IdentityResolver {
            lookup,
            reflector,
            lookup_timeout: Duration::from_secs(cfg.lookup_timeout_seconds),
            reflector_timeout: Duration::from_secs(cfg.reflector_timeout_seconds),
            instance_secret: generate_instance_secret(),
        }
    }

    /// HTTP chain with no peer reflector; the common embedding.
    pub fn http() -> Result<Self, LookupError> {
        Ok(IdentityResolver::new(
            Box::new(HttpIpLookup::new()?),
            Box::new(NullReflector),
        ))
    }

    pub fn with_timeouts(mut self, lookup: Duration, reflector: Duration) -> Self {
        self.lookup_timeout = lookup;
        self.reflector_timeout = reflector;
        self
    }

    /// Pins the per-instance secret. The synthetic fallback is stable per
    /// secret, so a pinned secret makes it reproducible across restarts.
    pub fn with_instance_secret(mut self, secret: impl Into<String>) -> Self {
        self.instance_secret = secret.into();
        self
    }

    pub fn resolve(&self, probe: &dyn EnvironmentProbe) -> String {
        for endpoint in &LOOKUP_ENDPOINTS {
            match self.lookup.fetch(endpoint, self.lookup_timeout) {
                Ok(raw) => {
                    let ip = raw.trim();
                    if is_valid_public_ipv4(ip) {
                        tracing::debug!(endpoint = endpoint.url, ip, "ip lookup succeeded");
                        return ip.to_string();
                    }
                    tracing::debug!(endpoint = endpoint.url, ip, "ip lookup returned unusable address");
                }
                Err(err) => {
                    tracing::debug!(endpoint = endpoint.url, %err, "ip lookup failed");
                }
            }
        }

        if let Some(candidate) = self.reflector.reflect(self.reflector_timeout) {
            if let Some(ip) = extract_candidate_ipv4(&candidate) {
                if is_valid_public_ipv4(&ip) {
                    tracing::debug!(ip, "side channel produced a public address");
                    return ip;
                }
            }
        }

        tracing::debug!("all resolution layers exhausted; synthesizing session ip");
        synthetic_session_ip(&browser_fingerprint(probe), &self.instance_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;
    use std::sync::Mutex;

    struct ScriptedLookup {
        responses: Mutex<Vec<Result<String, LookupError>>>,
    }

    impl ScriptedLookup {
        fn new(responses: Vec<Result<String, LookupError>>) -> Self {
            ScriptedLookup {
                responses: Mutex::new(responses),
            }
        }
    }

    impl IpLookup for ScriptedLookup {
        fn fetch(&self, _: &LookupEndpoint, _: Duration) -> Result<String, LookupError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(LookupError::Transport("exhausted".to_string()))
            } else {
                responses.remove(0)
            }
        }
    }

    struct FixedReflector(Option<String>);

    impl PeerReflector for FixedReflector {
        fn reflect(&self, _: Duration) -> Option<String> {
            self.0.clone()
        }
    }

    fn resolver(lookup: ScriptedLookup, reflector: FixedReflector) -> IdentityResolver {
        IdentityResolver::new(Box::new(lookup), Box::new(reflector))
            .with_instance_secret("fixed-secret")
    }

    #[test]
    fn private_ranges_are_rejected() {
        for ip in [
            "10.0.0.1",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.9.9",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.10.20",
        ] {
            assert!(!is_valid_public_ipv4(ip), "{} should be private", ip);
        }
    }

    #[test]
    fn public_addresses_pass() {
        for ip in ["8.8.8.8", "1.1.1.1", "203.0.113.55", "172.32.0.1", "172.15.0.1"] {
            assert!(is_valid_public_ipv4(ip), "{} should be public", ip);
        }
    }

    #[test]
    fn syntax_errors_fail_validation() {
        for ip in ["", "1.2.3", "1.2.3.4.5", "256.1.1.1", "a.b.c.d", "1.2.3.+4", "01.2.3.4567"] {
            assert!(!is_valid_public_ipv4(ip), "{} should be invalid", ip);
        }
    }

    #[test]
    fn first_usable_lookup_wins() {
        let lookup = ScriptedLookup::new(vec![
            Err(LookupError::Status(503)),
            Ok("192.168.1.10".to_string()), // private; skipped
            Ok("  198.18.7.7\n".to_string()),
        ]);
        let r = resolver(lookup, FixedReflector(None));
        assert_eq!(r.resolve(&StaticProbe::default()), "198.18.7.7");
    }

    #[test]
    fn side_channel_covers_a_dead_chain() {
        let lookup = ScriptedLookup::new(vec![]);
        let candidate = "candidate:842163049 1 udp 1677729535 89.64.12.7 58180 typ srflx".to_string();
        let r = resolver(lookup, FixedReflector(Some(candidate)));
        assert_eq!(r.resolve(&StaticProbe::default()), "89.64.12.7");
    }

    #[test]
    fn private_side_channel_addresses_are_discarded() {
        let lookup = ScriptedLookup::new(vec![]);
        let candidate = "candidate:1 1 udp 2113937151 192.168.0.12 54400 typ host".to_string();
        let r = resolver(lookup, FixedReflector(Some(candidate)));
        let ip = r.resolve(&StaticProbe::default());
        // Falls through to the synthetic layer.
        assert!(is_valid_public_ipv4(&ip));
        assert_ne!(ip, "192.168.0.12");
    }

    #[test]
    fn synthetic_fallback_is_deterministic_and_public() {
        let ip1 = synthetic_session_ip("seed", "secret");
        let ip2 = synthetic_session_ip("seed", "secret");
        assert_eq!(ip1, ip2);
        assert!(is_valid_public_ipv4(&ip1));

        let other_secret = synthetic_session_ip("seed", "different");
        assert!(is_valid_public_ipv4(&other_secret));
        assert_ne!(ip1, other_secret);
    }

    #[test]
    fn synthetic_fallback_is_stable_across_resolver_calls() {
        let probe = StaticProbe::default();
        let r1 = resolver(ScriptedLookup::new(vec![]), FixedReflector(None));
        let first = r1.resolve(&probe);
        let r2 = resolver(ScriptedLookup::new(vec![]), FixedReflector(None));
        let second = r2.resolve(&probe);
        assert_eq!(first, second);
        assert!(is_valid_public_ipv4(&first));
    }

    #[test]
    fn many_seeds_stay_inside_the_public_range() {
        for i in 0..256 {
            let ip = synthetic_session_ip(&format!("seed-{}", i), "secret");
            assert!(is_valid_public_ipv4(&ip), "{} escaped the public range", ip);
        }
    }
}
