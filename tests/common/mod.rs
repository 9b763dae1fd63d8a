#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rotabot::config::{EngineSettings, Node, Preset, Profile, SampleSpec};
use rotabot::engine::{ChannelScheduler, Cursor, EngineCallbacks, MacroEngine, TaskQueue};
use rotabot::io::{KeyError, KeySender, PixelSampler, SampleError};
use rotabot::utils::color::Rgb;
use serde_json::{Value, json};

pub const READY: Rgb = Rgb(0, 200, 0);

/// Records every key it is asked to press.
#[derive(Clone, Default)]
pub struct RecordingKeys(pub Arc<Mutex<Vec<String>>>);

impl RecordingKeys {
    pub fn sent(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl KeySender for RecordingKeys {
    fn send_key(&mut self, key: &str) -> Result<(), KeyError> {
        self.0.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// Returns the same color for every location.
pub struct SolidSampler(pub Rgb);

impl PixelSampler for SolidSampler {
    fn sample_rgb(&self, _: i32, _: i32, _: &SampleSpec, _: &str, _: bool) -> Result<Rgb, SampleError> {
        Ok(self.0)
    }
}

/// Panics on its first read, then behaves like [`SolidSampler`] with `READY`.
#[derive(Default)]
pub struct PanicOnceSampler(AtomicBool);

impl PixelSampler for PanicOnceSampler {
    fn sample_rgb(&self, _: i32, _: i32, _: &SampleSpec, _: &str, _: bool) -> Result<Rgb, SampleError> {
        if !self.0.swap(true, Ordering::SeqCst) {
            panic!("capture backend crashed");
        }
        Ok(READY)
    }
}

/// Panics on every read.
pub struct PanicSampler;

impl PixelSampler for PanicSampler {
    fn sample_rgb(&self, _: i32, _: i32, _: &SampleSpec, _: &str, _: bool) -> Result<Rgb, SampleError> {
        panic!("capture backend crashed");
    }
}

/// `READY` everywhere except one dark spot.
pub struct SpotSampler {
    pub dark: (i32, i32),
}

impl PixelSampler for SpotSampler {
    fn sample_rgb(&self, x: i32, y: i32, _: &SampleSpec, _: &str, _: bool) -> Result<Rgb, SampleError> {
        Ok(if (x, y) == self.dark { Rgb(0, 0, 0) } else { READY })
    }
}

/// Flags `entered` on its first key, then blocks for `hold`.
#[derive(Clone)]
pub struct SlowKeys {
    pub entered: Arc<AtomicBool>,
    pub hold: Duration,
}

impl KeySender for SlowKeys {
    fn send_key(&mut self, _: &str) -> Result<(), KeyError> {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(self.hold);
        Ok(())
    }
}

#[derive(Default)]
pub struct Recorder {
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, String)>>,
    pub nodes: Mutex<Vec<(Cursor, String)>>,
}

impl Recorder {
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.lock().unwrap().iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }
}

impl EngineCallbacks for Recorder {
    fn on_started(&self, preset_id: &str) {
        self.started.lock().unwrap().push(preset_id.to_string());
    }

    fn on_stopped(&self, reason: &str) {
        self.stopped.lock().unwrap().push(reason.to_string());
    }

    fn on_node_executed(&self, cursor: &Cursor, node: &Node) {
        self.nodes.lock().unwrap().push((cursor.clone(), node.id().to_string()));
    }

    fn on_error(&self, message: &str, detail: &str) {
        self.errors.lock().unwrap().push((message.to_string(), detail.to_string()));
    }
}

pub struct Harness {
    pub engine: MacroEngine,
    pub queue: TaskQueue,
    pub recorder: Arc<Recorder>,
    pub keys: RecordingKeys,
}

impl Harness {
    pub fn new() -> Self {
        let (ui, queue) = ChannelScheduler::new();
        let recorder = Arc::new(Recorder::default());
        let engine = MacroEngine::new(Arc::new(ui), recorder.clone());
        Self {
            engine,
            queue,
            recorder,
            keys: RecordingKeys::default(),
        }
    }

    pub fn start(&mut self, preset: Preset) -> Result<(), rotabot::engine::EngineError> {
        self.engine.start(
            preset,
            profile(),
            fast_settings(),
            Box::new(self.keys.clone()),
            Arc::new(SolidSampler(READY)),
        )
    }

    pub fn start_with(
        &mut self,
        preset: Preset,
        settings: EngineSettings,
        keys: Box<dyn KeySender>,
        sampler: Arc<dyn PixelSampler>,
    ) -> Result<(), rotabot::engine::EngineError> {
        self.engine.start(preset, profile(), settings, keys, sampler)
    }

    /// Poll the engine state until it reads `state` or `timeout` passes.
    pub fn wait_state(&self, state: rotabot::engine::RunState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.engine.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.engine.state() == state
    }

    /// Sum of `ready_false` over every skill.
    pub fn ready_false(&self) -> u64 {
        self.engine.stats_snapshot().iter().map(|s| s.ready_false).sum()
    }

    /// Run queued callbacks until `done` holds or `timeout` passes.
    pub fn pump_until(&self, timeout: Duration, mut done: impl FnMut(&Recorder) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.queue.run_pending();
            if done(&self.recorder) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.queue.run_one(Duration::from_millis(5));
        }
    }
}

pub fn profile() -> Profile {
    profile_with_hp(5, 5)
}

/// Same skills as [`profile`], with the `hp` point recorded at `(x, y)`.
pub fn profile_with_hp(x: i32, y: i32) -> Profile {
    serde_json::from_value(json!({
        "skills": [
            { "id": "a", "name": "Alpha", "trigger": { "key": "1" },
              "pixel": { "vx": 1, "vy": 1, "color": [0, 200, 0] } },
            { "id": "b", "name": "Bravo", "trigger": { "key": "2" },
              "pixel": { "vx": 2, "vy": 1, "color": [0, 200, 0] } }
        ],
        "points": [ { "id": "hp", "vx": x, "vy": y, "color": [0, 200, 0] } ]
    }))
    .unwrap()
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        default_skill_gap_ms: 1,
        poll_not_ready_ms: 1,
        tick_interval_ms: 1,
        gateway_poll_delay_ms: 1,
        start_signal_mode: rotabot::config::StartSignalMode::None,
        ..Default::default()
    }
}

pub fn preset(value: Value) -> Preset {
    serde_json::from_value(value).unwrap()
}

/// One global track alternating skills `a` and `b`.
pub fn ring_preset() -> Preset {
    preset(json!({
        "id": "ring",
        "entry": { "scope": "global", "track_id": "main", "node_id": "n1" },
        "global_tracks": [{
            "id": "main",
            "nodes": [
                { "kind": "skill", "id": "n1", "skill_id": "a" },
                { "kind": "skill", "id": "n2", "skill_id": "b" }
            ]
        }]
    }))
}
