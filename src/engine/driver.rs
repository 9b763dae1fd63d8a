//! The macro engine: a worker thread running the scheduling loop, driven by
//! commands from the host and reporting back through a [`UiScheduler`].

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_valid::Validate;
use tracing::{debug, error, info, warn};

use crate::config::{EngineSettings, EntryScope, Node, Preset, Profile, validate_preset};
use crate::engine::completion::policy_for;
use crate::engine::condition::{ConditionSet, EvalContext, Gate, evaluate};
use crate::engine::error::EngineError;
use crate::engine::executor::NodeExecutor;
use crate::engine::gateway::{self, ActiveRuntime, GatewayEnv};
use crate::engine::scheduling::{GlobalRuntime, ModeRuntime, Schedule};
use crate::engine::stats::{EngineShared, SkillStats};
use crate::io::keys::KeySender;
use crate::io::pixels::{CapturePlan, PixelSampler};
use crate::utils::wait::StopSignal;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// One-way task queue onto the host's UI thread.
///
/// Callbacks are never run on the worker thread; they are always handed
/// to `call_soon`.
pub trait UiScheduler: Send + Sync {
    fn call_soon(&self, task: Task);
}

/// A [`UiScheduler`] backed by a std channel. The host drains it with
/// [`TaskQueue::run_pending`].
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: Sender<Task>,
}

pub struct TaskQueue {
    rx: Receiver<Task>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, TaskQueue) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, TaskQueue { rx })
    }
}

impl UiScheduler for ChannelScheduler {
    fn call_soon(&self, task: Task) {
        if self.tx.send(task).is_err() {
            debug!(target: "rotabot::engine", "ui queue closed; dropping callback");
        }
    }
}

impl TaskQueue {
    /// Run every queued task without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut n = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            n += 1;
        }
        n
    }

    /// Block up to `timeout` for one task and run it.
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }
}

impl UiScheduler for tokio::sync::mpsc::UnboundedSender<Task> {
    fn call_soon(&self, task: Task) {
        if self.send(task).is_err() {
            debug!(target: "rotabot::engine", "ui queue closed; dropping callback");
        }
    }
}

/// Where a node sat when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// `None` while the global tracks are active.
    pub mode_id: Option<String>,
    pub track_id: String,
    pub node_index: usize,
}

/// Host-side notifications. All methods default to no-ops.
pub trait EngineCallbacks: Send + Sync {
    fn on_started(&self, _preset_id: &str) {}
    fn on_stopped(&self, _reason: &str) {}
    fn on_node_executed(&self, _cursor: &Cursor, _node: &Node) {}
    fn on_error(&self, _message: &str, _detail: &str) {}
}

/// Commands accepted by the worker between ticks.
#[derive(Debug)]
pub enum Command {
    Pause,
    Resume,
    /// Run exactly one scheduling decision, then pause again.
    Step,
    Stop,
    ReloadProfile(Profile),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stepping,
    Stopped,
}

/// Marshals callbacks onto the UI scheduler.
#[derive(Clone)]
struct Emitter {
    ui: Arc<dyn UiScheduler>,
    callbacks: Arc<dyn EngineCallbacks>,
    stopped: Arc<AtomicBool>,
}

impl Emitter {
    fn started(&self, preset_id: &str) {
        let cb = Arc::clone(&self.callbacks);
        let id = preset_id.to_string();
        self.ui.call_soon(Box::new(move || cb.on_started(&id)));
    }

    /// Only the first call per session is delivered.
    fn stopped(&self, reason: &str) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let cb = Arc::clone(&self.callbacks);
        let reason = reason.to_string();
        self.ui.call_soon(Box::new(move || cb.on_stopped(&reason)));
    }

    fn node_executed(&self, cursor: Cursor, node: Node) {
        let cb = Arc::clone(&self.callbacks);
        self.ui.call_soon(Box::new(move || cb.on_node_executed(&cursor, &node)));
    }

    fn error(&self, message: &str, detail: String) {
        let cb = Arc::clone(&self.callbacks);
        let message = message.to_string();
        self.ui.call_soon(Box::new(move || cb.on_error(&message, &detail)));
    }
}

struct Session {
    commands: Sender<Command>,
    stop: Arc<StopSignal>,
    state: Arc<Mutex<RunState>>,
    running: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
    emit: Emitter,
    join_timeout: Duration,
}

/// Runs a preset against a profile on a dedicated worker thread.
pub struct MacroEngine {
    ui: Arc<dyn UiScheduler>,
    callbacks: Arc<dyn EngineCallbacks>,
    shared: Arc<EngineShared>,
    session: Option<Session>,
}

impl MacroEngine {
    pub fn new(ui: Arc<dyn UiScheduler>, callbacks: Arc<dyn EngineCallbacks>) -> Self {
        Self {
            ui,
            callbacks,
            shared: Arc::new(EngineShared::new()),
            session: None,
        }
    }

    /// Validate `preset` and start the worker.
    ///
    /// On a validation failure `on_error` is delivered once with the
    /// rendered report and the engine never reaches a running state.
    pub fn start(
        &mut self,
        preset: Preset,
        profile: Profile,
        settings: EngineSettings,
        keys: Box<dyn KeySender>,
        sampler: Arc<dyn PixelSampler>,
    ) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        self.reap();

        let emit = Emitter {
            ui: Arc::clone(&self.ui),
            callbacks: Arc::clone(&self.callbacks),
            stopped: Arc::new(AtomicBool::new(false)),
        };

        if let Err(e) = settings.validate() {
            emit.error("invalid engine settings", e.to_string());
            return Err(EngineError::InvalidSettings(e.to_string()));
        }
        let report = validate_preset(&preset, Some(&profile));
        if report.has_errors() {
            warn!(target: "rotabot::engine", preset = %preset.id, "{}", report.render());
            emit.error("preset validation failed", report.render());
            return Err(EngineError::Validation(report));
        }
        for d in &report.diagnostics {
            debug!(target: "rotabot::engine", level = %d.level, code = d.code, path = %d.path, "{}", d.message);
        }

        let now = Instant::now();
        let runtime = match initial_runtime(&preset, now) {
            Ok(rt) => rt,
            Err(e) => {
                emit.error("preset validation failed", e.to_string());
                return Err(e);
            }
        };

        self.shared = Arc::new(EngineShared::new());
        let plan = CapturePlan::build(&profile, &preset);
        let profile = Arc::new(profile);
        let executor = NodeExecutor::new(
            keys,
            Arc::clone(&sampler),
            policy_for(settings.cast_bar.mode),
            Arc::clone(&self.shared),
            settings.clone(),
            Arc::clone(&profile),
            plan.clone(),
        );

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let stop = Arc::new(StopSignal::new());
        let state = Arc::new(Mutex::new(RunState::Running));
        let running = Arc::new(AtomicBool::new(true));
        let join_timeout = Duration::from_millis(settings.stop_join_timeout_ms);

        let worker = Worker {
            conditions: ConditionSet::compile(&preset),
            preset: Arc::new(preset),
            settings,
            executor,
            sampler,
            plan,
            runtime,
            commands: cmd_rx,
            stop: Arc::clone(&stop),
            state: Arc::clone(&state),
            shared: Arc::clone(&self.shared),
            emit: emit.clone(),
            stop_reason: None,
            executed: 0,
            started_at: now,
        };

        let worker_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("rotabot-worker".into())
            .spawn(move || {
                worker.run();
                worker_running.store(false, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .map_err(|e| {
                emit.error("failed to start worker", e.to_string());
                EngineError::WorkerSpawn(e)
            })?;

        self.session = Some(Session {
            commands: cmd_tx,
            stop,
            state,
            running,
            done: done_rx,
            handle,
            emit,
            join_timeout,
        });
        Ok(())
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.send(Command::Resume)
    }

    pub fn step(&self) -> Result<(), EngineError> {
        self.send(Command::Step)
    }

    /// Hand a changed profile to the worker; it is swapped in between ticks.
    pub fn reload_profile(&self, profile: Profile) -> Result<(), EngineError> {
        self.send(Command::ReloadProfile(profile))
    }

    /// Request a stop and join the worker, waiting at most
    /// `stop_join_timeout_ms`. `on_stopped` is delivered exactly once per
    /// session, whether the worker ended on its own or here.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let Some(session) = self.session.take() else {
            return Err(EngineError::NotRunning);
        };
        let _ = session.commands.send(Command::Stop);
        session.stop.raise();

        match session.done.recv_timeout(session.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if session.handle.join().is_err() {
                    error!(target: "rotabot::engine", "worker thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(target: "rotabot::engine", timeout_ms = session.join_timeout.as_millis() as u64, "worker did not exit in time; detaching");
            }
        }
        session.running.store(false, Ordering::SeqCst);
        set_state(&session.state, RunState::Stopped);
        session.emit.stopped("user");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.running.load(Ordering::SeqCst))
    }

    pub fn state(&self) -> RunState {
        match &self.session {
            Some(s) if s.running.load(Ordering::SeqCst) => *s.state.lock().unwrap_or_else(PoisonError::into_inner),
            _ => RunState::Stopped,
        }
    }

    pub fn is_cast_locked(&self) -> bool {
        self.shared.cast_lock.is_locked()
    }

    /// Owned copy of the per-skill counters.
    pub fn stats_snapshot(&self) -> Vec<SkillStats> {
        self.shared.stats.snapshot()
    }

    fn send(&self, cmd: Command) -> Result<(), EngineError> {
        let session = self.session.as_ref().filter(|s| s.running.load(Ordering::SeqCst));
        let Some(session) = session else {
            return Err(EngineError::NotRunning);
        };
        session.commands.send(cmd).map_err(|_| EngineError::NotRunning)
    }

    /// Join a session whose worker already ended on its own.
    fn reap(&mut self) {
        if let Some(session) = self.session.take() {
            if session.handle.join().is_err() {
                error!(target: "rotabot::engine", "worker thread panicked");
            }
        }
    }
}

impl Drop for MacroEngine {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.stop.raise();
        }
    }
}

fn set_state(state: &Mutex<RunState>, value: RunState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Build the runtime the entry point names, with its cursor placed.
fn initial_runtime(preset: &Preset, now: Instant) -> Result<ActiveRuntime, EngineError> {
    let entry = &preset.entry;
    let mut runtime = match entry.scope {
        EntryScope::Global => ActiveRuntime::Global(GlobalRuntime::new(&preset.global_tracks, now)),
        EntryScope::Mode => {
            let mode = preset
                .mode(&entry.mode_id)
                .ok_or_else(|| EngineError::Fatal(format!("entry mode '{}' not found", entry.mode_id)))?;
            ActiveRuntime::Mode(ModeRuntime::new(mode, now))
        }
        EntryScope::Unknown => return Err(EngineError::Fatal("entry scope is not recognized".into())),
    };

    let index = runtime
        .schedule()
        .node_index_of(&entry.track_id, &entry.node_id)
        .ok_or_else(|| {
            EngineError::Fatal(format!(
                "entry node '{}' not found in track '{}'",
                entry.node_id, entry.track_id
            ))
        })?;
    match &mut runtime {
        ActiveRuntime::Global(rt) => rt.jump_to(&entry.track_id, index),
        ActiveRuntime::Mode(rt) => rt.start_at(&entry.track_id, index),
    }
    Ok(runtime)
}

fn next_due(runtime: &ActiveRuntime, now: Instant) -> Option<String> {
    match runtime {
        ActiveRuntime::Global(rt) => rt.next_due(now),
        ActiveRuntime::Mode(rt) => rt.next_due(now),
    }
    .map(str::to_owned)
}

fn current_node(runtime: &ActiveRuntime, track_id: &str) -> Option<Node> {
    match runtime {
        ActiveRuntime::Global(rt) => rt.current_node(track_id),
        ActiveRuntime::Mode(rt) => rt.current_node(track_id),
    }
    .cloned()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// No track was due.
    Idle,
    /// A node was selected but kept its cursor (a skip that retries in place).
    Selected,
    /// A node was consumed and reported.
    Executed,
}

struct Worker {
    preset: Arc<Preset>,
    settings: EngineSettings,
    executor: NodeExecutor,
    sampler: Arc<dyn PixelSampler>,
    conditions: ConditionSet,
    /// Gateway capture plan; replaced only by `ReloadProfile`.
    plan: CapturePlan,
    runtime: ActiveRuntime,
    commands: Receiver<Command>,
    stop: Arc<StopSignal>,
    state: Arc<Mutex<RunState>>,
    shared: Arc<EngineShared>,
    emit: Emitter,
    stop_reason: Option<String>,
    executed: u64,
    started_at: Instant,
}

impl Worker {
    fn run(mut self) {
        info!(target: "rotabot::engine", preset = %self.preset.id, "engine started");
        self.emit.started(&self.preset.id);
        let tick = Duration::from_millis(self.settings.tick_interval_ms.max(1));

        loop {
            self.drain_commands();
            if self.stop.is_raised() {
                break;
            }
            if let Some(reason) = self.limit_reached() {
                info!(target: "rotabot::engine", %reason, "execution limit reached");
                self.stop_reason = Some(reason);
                break;
            }

            match self.state() {
                RunState::Stopped => break,
                RunState::Paused => match self.commands.recv_timeout(tick) {
                    Ok(cmd) => self.handle(cmd),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                RunState::Running | RunState::Stepping => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| self.tick()))
                        .unwrap_or_else(|payload| Err(EngineError::Fatal(panic_message(payload.as_ref()))));
                    match outcome {
                        Ok(Decision::Idle) => {
                            self.stop.wait_timeout(tick);
                        }
                        Ok(decision) => {
                            if self.state() == RunState::Stepping {
                                set_state(&self.state, RunState::Paused);
                            } else if decision == Decision::Selected {
                                self.stop.wait_timeout(tick);
                            }
                        }
                        Err(e) => {
                            error!(target: "rotabot::engine", error = %e, "tick failed");
                            self.emit.error("engine error", e.to_string());
                            if self.settings.stop_on_error {
                                self.stop_reason = Some("error".into());
                                break;
                            }
                            if self.state() == RunState::Stepping {
                                set_state(&self.state, RunState::Paused);
                            }
                            self.stop.wait_timeout(tick);
                        }
                    }
                }
            }
        }

        set_state(&self.state, RunState::Stopped);
        let reason = self.stop_reason.take().unwrap_or_else(|| "user".into());
        info!(target: "rotabot::engine", %reason, executed = self.executed, "engine stopped");
        self.emit.stopped(&reason);
    }

    fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stop.raise();
                    break;
                }
            }
        }
    }

    fn handle(&mut self, cmd: Command) {
        debug!(target: "rotabot::engine", ?cmd, "command");
        match cmd {
            Command::Pause => set_state(&self.state, RunState::Paused),
            Command::Resume => set_state(&self.state, RunState::Running),
            Command::Step => set_state(&self.state, RunState::Stepping),
            Command::Stop => self.stop.raise(),
            Command::ReloadProfile(profile) => {
                let plan = CapturePlan::build(&profile, &self.preset);
                info!(target: "rotabot::engine", samples = plan.len(), "profile reloaded");
                self.executor.set_profile(Arc::new(profile), plan.clone());
                self.plan = plan;
            }
        }
    }

    fn limit_reached(&self) -> Option<String> {
        let limits = &self.preset.limits;
        if limits.max_exec_nodes > 0 && self.executed >= limits.max_exec_nodes {
            return Some("limit:max_nodes".into());
        }
        if limits.max_run_seconds > 0.0 && self.started_at.elapsed().as_secs_f64() >= limits.max_run_seconds {
            return Some("limit:max_seconds".into());
        }
        None
    }

    /// Make at most one scheduling decision.
    ///
    /// The runtime stays in `self.runtime` throughout, so an error or a
    /// panic mid-decision leaves the schedule as it was.
    fn tick(&mut self) -> Result<Decision, EngineError> {
        let now = Instant::now();
        if let ActiveRuntime::Mode(rt) = &mut self.runtime {
            rt.ensure_step_runnable();
        }
        let Some(track_id) = next_due(&self.runtime, now) else {
            return Ok(Decision::Idle);
        };
        let node = current_node(&self.runtime, &track_id)
            .ok_or_else(|| EngineError::Fatal(format!("track '{track_id}' has no current node")))?;
        let cursor = Cursor {
            mode_id: self.runtime.mode_id().map(str::to_owned),
            node_index: self.runtime.schedule().current_node_index(&track_id).unwrap_or(0),
            track_id: track_id.clone(),
        };

        match &node {
            Node::Skill(skill) => {
                let out = self.executor.execute_skill(skill, &self.stop);
                let schedule = self.runtime.schedule_mut();
                if out.advance {
                    schedule.advance(&track_id);
                }
                schedule.set_next_at(&track_id, Instant::now() + out.next_delay);
                if !out.advance {
                    return Ok(Decision::Selected);
                }
            }
            Node::Gateway(gw) => {
                let fire = match self.conditions.gate(gw) {
                    Gate::Always => true,
                    Gate::Expr(expr) => {
                        let frame = self.plan.capture(self.sampler.as_ref(), self.settings.pixel_require_inside);
                        let stats = self.shared.stats.snapshot();
                        let ctx = EvalContext {
                            profile: self.executor.profile(),
                            frame: &frame,
                            metrics: &stats,
                        };
                        evaluate(expr, &ctx).is_satisfied()
                    }
                    Gate::Missing => {
                        warn!(target: "rotabot::gateway", node = %gw.id, "gateway condition not found");
                        false
                    }
                };

                let preset = &self.preset;
                let build_mode = |mode_id: &str| preset.mode(mode_id).map(|m| ModeRuntime::new(m, now));
                let mut env = GatewayEnv {
                    now,
                    poll_delay: Duration::from_millis(self.settings.gateway_poll_delay_ms),
                    stop: &self.stop,
                    stop_reason: &mut self.stop_reason,
                    build_mode: &build_mode,
                };
                if fire {
                    self.runtime = gateway::apply(gw, &track_id, self.runtime.clone(), &mut env);
                } else {
                    gateway::pass_through(&track_id, &mut self.runtime, &env);
                }
            }
        }

        self.executed += 1;
        self.emit.node_executed(cursor, node);
        Ok(Decision::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_scheduler_defers_until_drained() {
        let (ui, queue) = ChannelScheduler::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let hits = Arc::clone(&hits);
            ui.call_soon(Box::new(move || hits.lock().unwrap().push(i)));
        }
        assert!(hits.lock().unwrap().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*hits.lock().unwrap(), [0, 1, 2]);
        assert_eq!(queue.run_pending(), 0);
    }

    #[test]
    fn stopped_is_emitted_once() {
        struct Count(Mutex<Vec<String>>);
        impl EngineCallbacks for Count {
            fn on_stopped(&self, reason: &str) {
                self.0.lock().unwrap().push(reason.to_string());
            }
        }
        let (ui, queue) = ChannelScheduler::new();
        let cb = Arc::new(Count(Mutex::new(Vec::new())));
        let emit = Emitter {
            ui: Arc::new(ui),
            callbacks: cb.clone(),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        emit.stopped("end:n1");
        emit.stopped("user");
        queue.run_pending();
        assert_eq!(*cb.0.lock().unwrap(), ["end:n1"]);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let p = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "boom");
        let p = catch_unwind(|| panic!("{} {}", "sampler", 3)).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "sampler 3");
    }
}
