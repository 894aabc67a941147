// src/behavior.rs
// Passive interaction monitoring.
// All updates are synchronous and in-order on the thread delivering the
// event; the state is owned by the gate and resets with the session.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::probe::WindowMetrics;

const TELEPORT_MAX_INTERVAL_MS: u64 = 10;
const TELEPORT_MIN_DISTANCE_PX: f64 = 200.0;
const SUPERHUMAN_SPEED_PX_PER_MS: f64 = 30.0;
const KEYPRESS_HISTORY: usize = 10;
const TYPING_MIN_SAMPLES: usize = 5;
const TYPING_VARIANCE_FLOOR: f64 = 50.0;
const TYPING_MEAN_FLOOR_MS: f64 = 100.0;
const CLICK_HISTORY: usize = 5;
const CLICK_BOX_PX: f64 = 10.0;
const FOCUS_HISTORY: usize = 20;
const FOCUS_WINDOW_MS: u64 = 10_000;
const FOCUS_SWITCH_LIMIT: usize = 15;
const ACTIVITY_CAP: usize = 50;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    MouseTeleportation,
    SuperhumanMouseSpeed,
    RoboticTyping,
    RepetitiveClicks,
    RapidFocusSwitching,
    DevtoolsAbuse,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::MouseTeleportation => "mouse_teleportation",
            ActivityKind::SuperhumanMouseSpeed => "superhuman_mouse_speed",
            ActivityKind::RoboticTyping => "robotic_typing",
            ActivityKind::RepetitiveClicks => "repetitive_clicks",
            ActivityKind::RapidFocusSwitching => "rapid_focus_switching",
            ActivityKind::DevtoolsAbuse => "devtools_abuse",
        }
    }

    pub fn is_mouse_anomaly(self) -> bool {
        matches!(
            self,
            ActivityKind::MouseTeleportation | ActivityKind::SuperhumanMouseSpeed
        )
    }

    pub fn is_timing_anomaly(self) -> bool {
        matches!(
            self,
            ActivityKind::RapidFocusSwitching | ActivityKind::DevtoolsAbuse
        )
    }
}

/// One recorded suspicious-activity event. Append-only, ring-bounded.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Activity {
    pub kind: ActivityKind,
    pub data: serde_json::Value,
    pub ts: u64,
}

#[derive(Debug, Clone, Copy)]
struct PointerSample {
    x: f64,
    y: f64,
    ts: u64,
}

#[derive(Debug, Clone, Copy)]
struct ClickSample {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTransition {
    Focus,
    Blur,
}

/// Ephemeral behavioral risk state for one session. Never persisted.
#[derive(Debug, Default)]
pub struct RiskState {
    pub behavior_score: u32,
    activities: VecDeque<Activity>,
    pub(crate) access_attempts: HashMap<String, Vec<u64>>,
    last_pointer: Option<PointerSample>,
    key_history: VecDeque<u64>,
    click_history: VecDeque<ClickSample>,
    focus_history: VecDeque<u64>,
    devtools_strikes: u32,
}

impl RiskState {
    pub fn new() -> Self {
        RiskState::default()
    }

    fn flag(&mut self, kind: ActivityKind, data: serde_json::Value, score: u32, now_ms: u64) {
        self.behavior_score = self.behavior_score.saturating_add(score);
        self.activities.push_back(Activity { kind, data, ts: now_ms });
        while self.activities.len() > ACTIVITY_CAP {
            self.activities.pop_front();
        }
    }

    /// Pointer movement. Flags teleportation (large jump in under 10 ms)
    /// and superhuman velocity (over 30 px/ms).
    pub fn observe_pointer(&mut self, x: f64, y: f64, now_ms: u64) -> Vec<ActivityKind> {
        let mut flagged = Vec::new();
        if let Some(prev) = self.last_pointer {
            let interval = now_ms.saturating_sub(prev.ts);
            let distance = ((x - prev.x).powi(2) + (y - prev.y).powi(2)).sqrt();

            if interval < TELEPORT_MAX_INTERVAL_MS && distance > TELEPORT_MIN_DISTANCE_PX {
                self.flag(
                    ActivityKind::MouseTeleportation,
                    json!({ "distance_px": distance, "interval_ms": interval }),
                    15,
                    now_ms,
                );
                flagged.push(ActivityKind::MouseTeleportation);
            }
            // Two events in the same millisecond with any displacement read
            // as unbounded velocity.
            let superhuman = if interval > 0 {
                distance / interval as f64 > SUPERHUMAN_SPEED_PX_PER_MS
            } else {
                distance > 0.0
            };
            if superhuman {
                self.flag(
                    ActivityKind::SuperhumanMouseSpeed,
                    json!({ "distance_px": distance, "interval_ms": interval }),
                    10,
                    now_ms,
                );
                flagged.push(ActivityKind::SuperhumanMouseSpeed);
            }
        }
        self.last_pointer = Some(PointerSample { x, y, ts: now_ms });
        flagged
    }

    /// Keypress timing. Once five samples exist, near-zero variance with a
    /// sub-100 ms mean interval reads as machine-driven input.
    pub fn observe_keypress(&mut self, now_ms: u64) -> Vec<ActivityKind> {
        self.key_history.push_back(now_ms);
        while self.key_history.len() > KEYPRESS_HISTORY {
            self.key_history.pop_front();
        }
        if self.key_history.len() < TYPING_MIN_SAMPLES {
            return Vec::new();
        }

        let times: Vec<u64> = self.key_history.iter().copied().collect();
        let intervals: Vec<f64> = times
            .windows(2)
            .map(|w| w[1].saturating_sub(w[0]) as f64)
            .collect();
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let variance = intervals
            .iter()
            .map(|i| (i - mean).powi(2))
            .sum::<f64>()
            / intervals.len() as f64;

        if variance < TYPING_VARIANCE_FLOOR && mean < TYPING_MEAN_FLOOR_MS {
            self.flag(
                ActivityKind::RoboticTyping,
                json!({ "mean_interval_ms": mean, "variance": variance }),
                25,
                now_ms,
            );
            return vec![ActivityKind::RoboticTyping];
        }
        Vec::new()
    }

    /// Click positions. The last three landing inside a 10 px box flags
    /// repetitive clicking.
    pub fn observe_click(&mut self, x: f64, y: f64, now_ms: u64) -> Vec<ActivityKind> {
        self.click_history.push_back(ClickSample { x, y });
        while self.click_history.len() > CLICK_HISTORY {
            self.click_history.pop_front();
        }
        if self.click_history.len() < 3 {
            return Vec::new();
        }

        let last_three: Vec<ClickSample> = self
            .click_history
            .iter()
            .rev()
            .take(3)
            .copied()
            .collect();
        let anchor = last_three[last_three.len() - 1];
        let same_position = last_three.iter().all(|c| {
            (c.x - anchor.x).abs() < CLICK_BOX_PX && (c.y - anchor.y).abs() < CLICK_BOX_PX
        });

        if same_position {
            self.flag(
                ActivityKind::RepetitiveClicks,
                json!({ "x": anchor.x, "y": anchor.y }),
                20,
                now_ms,
            );
            return vec![ActivityKind::RepetitiveClicks];
        }
        Vec::new()
    }

    /// Focus/blur transitions. More than 15 inside the trailing 10 seconds
    /// flags rapid switching.
    pub fn observe_focus(&mut self, _transition: FocusTransition, now_ms: u64) -> Vec<ActivityKind> {
        self.focus_history.push_back(now_ms);
        while self.focus_history.len() > FOCUS_HISTORY {
            self.focus_history.pop_front();
        }

        let recent = self
            .focus_history
            .iter()
            .filter(|&&t| now_ms.saturating_sub(t) < FOCUS_WINDOW_MS)
            .count();
        if recent > FOCUS_SWITCH_LIMIT {
            self.flag(
                ActivityKind::RapidFocusSwitching,
                json!({ "switches": recent }),
                15,
                now_ms,
            );
            return vec![ActivityKind::RapidFocusSwitching];
        }
        Vec::new()
    }

    /// 30-second inspector probe. The outer/inner gap must persist for
    /// `strikes` consecutive probes before it is flagged; the counter
    /// resets as soon as the gap disappears.
    pub fn observe_window_gap(
        &mut self,
        metrics: WindowMetrics,
        gap_px: u32,
        strikes: u32,
        now_ms: u64,
    ) -> Vec<ActivityKind> {
        let width_gap = metrics.outer_width.saturating_sub(metrics.inner_width) > gap_px;
        let height_gap = metrics.outer_height.saturating_sub(metrics.inner_height) > gap_px;

        if width_gap || height_gap {
            self.devtools_strikes += 1;
            if self.devtools_strikes >= strikes {
                self.flag(
                    ActivityKind::DevtoolsAbuse,
                    json!({
                        "consecutive_probes": self.devtools_strikes,
                        "outer": format!("{}x{}", metrics.outer_width, metrics.outer_height),
                        "inner": format!("{}x{}", metrics.inner_width, metrics.inner_height),
                    }),
                    15,
                    now_ms,
                );
                return vec![ActivityKind::DevtoolsAbuse];
            }
        } else {
            self.devtools_strikes = 0;
        }
        Vec::new()
    }

    /// Periodic decay, floored at zero.
    pub fn decay(&mut self, step: u32) {
        self.behavior_score = self.behavior_score.saturating_sub(step);
    }

    pub fn activity_count(&self, kind: ActivityKind) -> usize {
        self.activities.iter().filter(|a| a.kind == kind).count()
    }

    pub fn mouse_anomaly_count(&self) -> usize {
        self.activities
            .iter()
            .filter(|a| a.kind.is_mouse_anomaly())
            .count()
    }

    pub fn timing_anomaly_count(&self) -> usize {
        self.activities
            .iter()
            .filter(|a| a.kind.is_timing_anomaly())
            .count()
    }

    pub fn recent_activities(&self, limit: usize) -> Vec<Activity> {
        let skip = self.activities.len().saturating_sub(limit);
        self.activities.iter().skip(skip).cloned().collect()
    }

    pub fn activity_len(&self) -> usize {
        self.activities.len()
    }
}
