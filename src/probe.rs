// src/probe.rs
// Capability boundary over the ambient environment.
// The engine never reads platform globals directly: every entropy and
// telemetry source comes through this trait, so a deterministic double
// can stand in for a live browser surface.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// The capability does not exist on this surface.
    Unavailable,
    /// The capability exists but did not resolve within its budget.
    Timeout,
    /// The capability failed while being read.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub avail_width: u32,
    pub avail_height: u32,
    pub pixel_depth: u32,
}

#[derive(Debug, Clone)]
pub struct WebGlInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub shading_language_version: String,
    pub unmasked_vendor: String,
    pub unmasked_renderer: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub effective_type: String,
    pub downlink_mbps: f64,
    pub rtt_ms: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowMetrics {
    pub outer_width: u32,
    pub outer_height: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

/// Hard and soft automation markers as exposed by the surface.
#[derive(Debug, Clone)]
pub struct AutomationFlags {
    /// navigator.webdriver-style flag.
    pub webdriver: bool,
    /// Driver shim artifacts left in the document (e.g. `$cdc_` globals).
    pub driver_shim: bool,
    pub phantom: bool,
    pub nightmare: bool,
    /// A real Chrome surface exposes a runtime object; headless builds omit it.
    pub chrome_runtime: bool,
    pub plugin_count: u32,
    pub permissions_api: bool,
    pub notification_api: bool,
}

pub trait EnvironmentProbe {
    fn user_agent(&self) -> String;
    fn language(&self) -> String;
    fn languages(&self) -> Vec<String>;
    fn platform(&self) -> String;
    fn cookies_enabled(&self) -> bool;
    fn do_not_track(&self) -> Option<String>;
    fn hardware_concurrency(&self) -> Option<u32>;
    fn device_memory_gb(&self) -> Option<u32>;
    fn screen(&self) -> ScreenInfo;
    fn timezone_offset_minutes(&self) -> i32;
    fn timezone(&self) -> String;
    /// Serialized rendering snapshot; implementations own the draw calls.
    fn canvas_snapshot(&self) -> Result<String, ProbeError>;
    fn webgl_info(&self) -> Result<WebGlInfo, ProbeError>;
    /// Audio-pipeline-derived signature. Implementations enforce a 1-second
    /// budget and report `ProbeError::Timeout` past it.
    fn audio_signature(&self) -> Result<String, ProbeError>;
    /// Rendered width of `sample` under the given font stack.
    fn text_width(&self, font_stack: &str, sample: &str) -> f64;
    fn connection(&self) -> Option<ConnectionInfo>;
    /// Navigation-to-complete duration when timing data is exposed.
    fn navigation_duration_ms(&self) -> Option<u64>;
    fn window_metrics(&self) -> WindowMetrics;
    fn automation_flags(&self) -> AutomationFlags;
}

/// Deterministic probe with plausible desktop-browser values.
///
/// Serves two roles: the fixture for tests, and the default surface for
/// headless embeddings where no live environment exists. Every field is
/// public so scenarios can be staged directly.
pub struct StaticProbe {
    pub user_agent: String,
    pub language: String,
    pub languages: Vec<String>,
    pub platform: String,
    pub cookies_enabled: bool,
    pub do_not_track: Option<String>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory_gb: Option<u32>,
    pub screen: ScreenInfo,
    pub timezone_offset_minutes: i32,
    pub timezone: String,
    pub canvas_snapshot: Result<String, ProbeError>,
    pub webgl_info: Result<WebGlInfo, ProbeError>,
    pub audio_signature: Result<String, ProbeError>,
    /// Fonts reported as installed by the text-width measurement.
    pub installed_fonts: HashSet<String>,
    pub connection: Option<ConnectionInfo>,
    pub navigation_duration_ms: Option<u64>,
    pub window_metrics: WindowMetrics,
    pub automation_flags: AutomationFlags,
}

impl Default for StaticProbe {
    fn default() -> Self {
        StaticProbe {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            platform: "Linux x86_64".to_string(),
            cookies_enabled: true,
            do_not_track: None,
            hardware_concurrency: Some(8),
            device_memory_gb: Some(8),
            screen: ScreenInfo {
                width: 1920,
                height: 1080,
                color_depth: 24,
                avail_width: 1920,
                avail_height: 1053,
                pixel_depth: 24,
            },
            timezone_offset_minutes: -60,
            timezone: "Europe/Berlin".to_string(),
            canvas_snapshot: Ok("data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAMg".to_string()),
            webgl_info: Ok(WebGlInfo {
                vendor: "WebKit".to_string(),
                renderer: "WebKit WebGL".to_string(),
                version: "WebGL 1.0 (OpenGL ES 2.0 Chromium)".to_string(),
                shading_language_version: "WebGL GLSL ES 1.0".to_string(),
                unmasked_vendor: "Google Inc. (Intel)".to_string(),
                unmasked_renderer: "ANGLE (Intel, Mesa Intel(R) UHD Graphics, OpenGL 4.6)"
                    .to_string(),
            }),
            audio_signature: Ok(
                "-112.4,-109.8,-108.1,-107.9,-106.2,-105.7,-105.1,-104.9".to_string()
            ),
            installed_fonts: ["Arial", "Verdana", "Georgia", "Courier New", "Tahoma"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            connection: Some(ConnectionInfo {
                effective_type: "4g".to_string(),
                downlink_mbps: 8.4,
                rtt_ms: 60,
            }),
            navigation_duration_ms: Some(1240),
            window_metrics: WindowMetrics {
                outer_width: 1920,
                outer_height: 1080,
                inner_width: 1920,
                inner_height: 975,
            },
            automation_flags: AutomationFlags {
                webdriver: false,
                driver_shim: false,
                phantom: false,
                nightmare: false,
                chrome_runtime: true,
                plugin_count: 3,
                permissions_api: true,
                notification_api: true,
            },
        }
    }
}

// Base widths per generic family, and the delta an installed candidate
// font adds on top. The absolute numbers are arbitrary; only inequality
// against the base family matters to the font probe.
const BASE_WIDTHS: [(&str, f64); 3] = [("monospace", 420.0), ("sans-serif", 460.0), ("serif", 450.0)];
const INSTALLED_FONT_DELTA: f64 = 12.0;

impl EnvironmentProbe for StaticProbe {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn cookies_enabled(&self) -> bool {
        self.cookies_enabled
    }

    fn do_not_track(&self) -> Option<String> {
        self.do_not_track.clone()
    }

    fn hardware_concurrency(&self) -> Option<u32> {
        self.hardware_concurrency
    }

    fn device_memory_gb(&self) -> Option<u32> {
        self.device_memory_gb
    }

    fn screen(&self) -> ScreenInfo {
        self.screen
    }

    fn timezone_offset_minutes(&self) -> i32 {
        self.timezone_offset_minutes
    }

    fn timezone(&self) -> String {
        self.timezone.clone()
    }

    fn canvas_snapshot(&self) -> Result<String, ProbeError> {
        self.canvas_snapshot.clone()
    }

    fn webgl_info(&self) -> Result<WebGlInfo, ProbeError> {
        self.webgl_info.clone()
    }

    fn audio_signature(&self) -> Result<String, ProbeError> {
        self.audio_signature.clone()
    }

    fn text_width(&self, font_stack: &str, sample: &str) -> f64 {
        // Stack shape is either "72px <base>" or "72px <candidate>, <base>".
        let stack = font_stack.split_once(' ').map(|(_, rest)| rest).unwrap_or(font_stack);
        let sample_scale = sample.encode_utf16().count() as f64;
        match stack.split_once(',') {
            Some((candidate, base)) => {
                let base_width = base_family_width(base.trim());
                if self.installed_fonts.contains(candidate.trim()) {
                    base_width + INSTALLED_FONT_DELTA + sample_scale
                } else {
                    base_width + sample_scale
                }
            }
            None => base_family_width(stack.trim()) + sample_scale,
        }
    }

    fn connection(&self) -> Option<ConnectionInfo> {
        self.connection.clone()
    }

    fn navigation_duration_ms(&self) -> Option<u64> {
        self.navigation_duration_ms
    }

    fn window_metrics(&self) -> WindowMetrics {
        self.window_metrics
    }

    fn automation_flags(&self) -> AutomationFlags {
        self.automation_flags.clone()
    }
}

fn base_family_width(family: &str) -> f64 {
    BASE_WIDTHS
        .iter()
        .find(|(name, _)| *name == family)
        .map(|(_, w)| *w)
        .unwrap_or(440.0)
}
