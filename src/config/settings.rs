use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;

/// Engine tunables. Every field has a default so a bundle may omit the
/// whole `settings` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct EngineSettings {
    /// Delay after a finished skill before its track is eligible again.
    pub default_skill_gap_ms: u64,

    /// Random extra delay in `0..=gap_jitter_ms` added to the skill gap.
    pub gap_jitter_ms: u64,

    /// Reschedule delay when a skill is not ready or the cast lock is busy.
    #[validate(minimum = 1)]
    pub poll_not_ready_ms: u64,

    pub start_signal_mode: StartSignalMode,

    #[validate(minimum = 1)]
    pub start_timeout_ms: u64,

    #[validate(minimum = 1)]
    pub start_poll_ms: u64,

    #[validate(maximum = 20)]
    pub max_retries: u32,

    pub retry_gap_ms: u64,

    #[validate]
    pub cast_bar: CastBarSettings,

    /// Worker loop poll interval.
    #[validate(minimum = 1)]
    pub tick_interval_ms: u64,

    /// Reschedule delay for a track after one of its gateways ran.
    pub gateway_poll_delay_ms: u64,

    /// Halt the loop after a fatal error instead of continuing.
    pub stop_on_error: bool,

    /// Bound on how long `stop()` waits for the worker to exit.
    #[validate(minimum = 1)]
    pub stop_join_timeout_ms: u64,

    /// Passed to the sampler; reject coordinates outside the monitor.
    pub pixel_require_inside: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_skill_gap_ms: 50,
            gap_jitter_ms: 0,
            poll_not_ready_ms: 50,
            start_signal_mode: StartSignalMode::Pixel,
            start_timeout_ms: 400,
            start_poll_ms: 20,
            max_retries: 1,
            retry_gap_ms: 50,
            cast_bar: CastBarSettings::default(),
            tick_interval_ms: 10,
            gateway_poll_delay_ms: 10,
            stop_on_error: false,
            stop_join_timeout_ms: 2_000,
            pixel_require_inside: true,
        }
    }
}

impl EngineSettings {
    /// Switch off every screen-driven signal: casts start when the key is
    /// sent and finish on the timer. Returns whether anything changed.
    pub fn disable_screen_signals(&mut self) -> bool {
        let changed = self.start_signal_mode != StartSignalMode::None || self.cast_bar.mode != CastBarMode::Timer;
        self.start_signal_mode = StartSignalMode::None;
        self.cast_bar.mode = CastBarMode::Timer;
        changed
    }
}

/// How the executor confirms that a cast began.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartSignalMode {
    /// The skill's ready pixel stops matching its recorded color.
    #[default]
    Pixel,
    /// The cast-bar point deviates from its pre-send baseline.
    CastBar,
    /// Assume the cast started as soon as the key was sent.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct CastBarSettings {
    pub mode: CastBarMode,

    /// Profile point watched for cast-bar changes.
    pub point_id: String,

    pub tolerance: u8,

    #[validate(minimum = 1)]
    pub poll_interval_ms: u64,

    /// Completion timeout is `cast_ms * max_wait_factor`.
    #[validate(exclusive_minimum = 0.0)]
    pub max_wait_factor: f64,
}

impl Default for CastBarSettings {
    fn default() -> Self {
        Self {
            mode: CastBarMode::Timer,
            point_id: String::new(),
            tolerance: 15,
            poll_interval_ms: 20,
            max_wait_factor: 1.5,
        }
    }
}

/// Completion strategy selector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CastBarMode {
    /// Trust the cast to finish on its own.
    #[default]
    Timer,
    /// Watch the cast-bar point until it changes.
    Bar,
}
