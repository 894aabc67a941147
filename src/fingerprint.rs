// src/fingerprint.rs
// Device fingerprint composition.
// Components are concatenated in a fixed order (order changes the hash)
// and folded through a 32-bit rolling hash rendered as base-36. A
// component that fails to read is replaced by a literal error sentinel
// rather than aborting the whole composition.

use crate::probe::{EnvironmentProbe, ProbeError};

const COMPONENT_DELIMITER: &str = "|";
const FONT_SAMPLE: &str = "mmmmmmmmlli";
const BASE_FAMILIES: [&str; 3] = ["monospace", "sans-serif", "serif"];
const FONT_CANDIDATES: [&str; 17] = [
    "Arial",
    "Helvetica",
    "Times",
    "Times New Roman",
    "Courier New",
    "Courier",
    "Verdana",
    "Georgia",
    "Palatino",
    "Garamond",
    "Bookman",
    "Comic Sans MS",
    "Trebuchet MS",
    "Arial Black",
    "Impact",
    "Tahoma",
    "Lucida Console",
];

/// 32-bit rolling hash over UTF-16 code units: `h = h*31 + unit`, folded
/// with two's-complement truncation, absolute value taken at the end.
pub(crate) fn fold_hash(input: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    hash.unsigned_abs()
}

pub(crate) fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Composes the full device fingerprint. Deterministic for a given
/// environment; only genuinely varying components (audio jitter) change it.
pub fn compose_fingerprint(probe: &dyn EnvironmentProbe) -> String {
    let mut components: Vec<String> = Vec::with_capacity(20);

    components.push(probe.user_agent());
    components.push(probe.language());
    components.push(probe.platform());
    components.push(probe.cookies_enabled().to_string());
    components.push(
        probe
            .do_not_track()
            .unwrap_or_else(|| "unspecified".to_string()),
    );
    components.push(
        probe
            .hardware_concurrency()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );
    components.push(
        probe
            .device_memory_gb()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );

    let screen = probe.screen();
    components.push(format!(
        "{}x{}x{}",
        screen.width, screen.height, screen.color_depth
    ));
    components.push(format!("{}x{}", screen.avail_width, screen.avail_height));
    components.push(screen.pixel_depth.to_string());

    components.push(probe.timezone_offset_minutes().to_string());
    components.push(probe.timezone());

    components.push(canvas_component(probe));
    components.push(webgl_component(probe));
    components.push(audio_component(probe));
    components.push(font_component(probe));

    // Hints appended only when the surface exposes them.
    if let Some(conn) = probe.connection() {
        components.push(conn.effective_type);
        components.push(conn.downlink_mbps.to_string());
    }
    if let Some(duration) = probe.navigation_duration_ms() {
        components.push(duration.to_string());
    }

    to_base36(fold_hash(&components.join(COMPONENT_DELIMITER)) as u64)
}

/// Lightweight 5-component fingerprint used to seed the synthetic
/// session IP. Not hashed here; the consumer folds in its own secret.
pub fn browser_fingerprint(probe: &dyn EnvironmentProbe) -> String {
    let screen = probe.screen();
    [
        probe.user_agent(),
        probe.language(),
        format!("{}x{}", screen.width, screen.height),
        probe.timezone_offset_minutes().to_string(),
        probe.platform(),
    ]
    .join(COMPONENT_DELIMITER)
}

fn canvas_component(probe: &dyn EnvironmentProbe) -> String {
    probe
        .canvas_snapshot()
        .unwrap_or_else(|_| "canvas-error".to_string())
}

fn webgl_component(probe: &dyn EnvironmentProbe) -> String {
    match probe.webgl_info() {
        Ok(info) => [
            info.vendor,
            info.renderer,
            info.version,
            info.shading_language_version,
            info.unmasked_vendor,
            info.unmasked_renderer,
        ]
        .join(COMPONENT_DELIMITER),
        Err(ProbeError::Unavailable) => "no-webgl".to_string(),
        Err(_) => "webgl-error".to_string(),
    }
}

fn audio_component(probe: &dyn EnvironmentProbe) -> String {
    match probe.audio_signature() {
        Ok(sig) if sig.is_empty() => "audio-fallback".to_string(),
        Ok(sig) => sig,
        Err(ProbeError::Timeout) => "audio-timeout".to_string(),
        Err(_) => "audio-error".to_string(),
    }
}

/// A candidate font counts as present when its measured width under any
/// of the three generic base families differs from that family's baseline.
fn font_component(probe: &dyn EnvironmentProbe) -> String {
    let mut present: Vec<&str> = Vec::new();
    for font in FONT_CANDIDATES {
        let detected = BASE_FAMILIES.iter().any(|base| {
            let baseline = probe.text_width(&format!("72px {}", base), FONT_SAMPLE);
            let measured = probe.text_width(&format!("72px {}, {}", font, base), FONT_SAMPLE);
            (measured - baseline).abs() > f64::EPSILON
        });
        if detected {
            present.push(font);
        }
    }
    present.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, StaticProbe};

    #[test]
    fn fold_hash_matches_known_values() {
        assert_eq!(fold_hash(""), 0);
        // 'a' alone folds to its code point.
        assert_eq!(fold_hash("a"), 97);
        // "ab": 97*31 + 98
        assert_eq!(fold_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn base36_renders_expected_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(97), "2p");
    }

    #[test]
    fn composition_is_idempotent() {
        let probe = StaticProbe::default();
        assert_eq!(compose_fingerprint(&probe), compose_fingerprint(&probe));
    }

    #[test]
    fn any_single_component_change_moves_the_hash() {
        let base = compose_fingerprint(&StaticProbe::default());

        let mut probe = StaticProbe::default();
        probe.language = "fr-FR".to_string();
        assert_ne!(compose_fingerprint(&probe), base);

        let mut probe = StaticProbe::default();
        probe.timezone_offset_minutes = 300;
        assert_ne!(compose_fingerprint(&probe), base);

        let mut probe = StaticProbe::default();
        probe.installed_fonts.remove("Arial");
        assert_ne!(compose_fingerprint(&probe), base);
    }

    #[test]
    fn failed_components_fall_back_to_sentinels() {
        let mut probe = StaticProbe::default();
        probe.canvas_snapshot = Err(ProbeError::Failed);
        probe.webgl_info = Err(ProbeError::Unavailable);
        probe.audio_signature = Err(ProbeError::Timeout);

        // Composition still succeeds and is stable.
        let fp = compose_fingerprint(&probe);
        assert_eq!(fp, compose_fingerprint(&probe));
        assert_ne!(fp, compose_fingerprint(&StaticProbe::default()));
    }

    #[test]
    fn missing_connection_hints_shorten_the_component_list() {
        let mut probe = StaticProbe::default();
        probe.connection = None;
        probe.navigation_duration_ms = None;
        assert_ne!(
            compose_fingerprint(&probe),
            compose_fingerprint(&StaticProbe::default())
        );
    }

    #[test]
    fn font_probe_reports_installed_candidates_only() {
        let probe = StaticProbe::default();
        let fp_all = compose_fingerprint(&probe);

        let mut bare = StaticProbe::default();
        bare.installed_fonts.clear();
        assert_ne!(compose_fingerprint(&bare), fp_all);
    }
}
