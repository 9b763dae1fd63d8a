//! The skill attempt state machine.
//!
//! One call to [`NodeExecutor::execute_skill`] walks a skill node through
//! ready check, cast lock, key send, start signal (with retries) and
//! completion. Every wait is interruptible through the [`StopSignal`], and
//! the cast lock is released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use rand::random_range;
use tracing::{debug, trace, warn};

use crate::config::{ConditionExpr, EngineSettings, Profile, SkillNode, SkillRecord, StartSignalMode};
use crate::engine::completion::{Completion, CompletionContext, CompletionPolicy};
use crate::engine::condition::{EvalContext, evaluate};
use crate::engine::stats::{EngineShared, SkillStats};
use crate::io::keys::KeySender;
use crate::io::pixels::{CapturePlan, PixelSampler, sample_point, sample_spec};
use crate::utils::color::{Rgb, color_match};
use crate::utils::wait::{Poll, StopSignal};

/// Why an attempt failed after the ready check passed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailReason {
    NoCastStart,
    Timeout,
    SendKeyError,
    CastBarUnavailable,
    NoKey,
}

impl FailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailReason::NoCastStart => "no_cast_start",
            FailReason::Timeout => "timeout",
            FailReason::SendKeyError => "send_key_error",
            FailReason::CastBarUnavailable => "cast_bar_unavailable",
            FailReason::NoKey => "no_key",
        }
    }
}

/// Why a node was passed over without an attempt completing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SkipReason {
    NotReady,
    LockBusy,
    Disabled,
    UnknownSkill,
    Stopped,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NotReady => "not_ready",
            SkipReason::LockBusy => "lock_busy",
            SkipReason::Disabled => "disabled",
            SkipReason::UnknownSkill => "unknown_skill",
            SkipReason::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecResult {
    Success,
    Skipped(SkipReason),
    Failed(FailReason),
}

impl ExecResult {
    pub fn label(self) -> &'static str {
        match self {
            ExecResult::Success => "success",
            ExecResult::Skipped(r) => r.as_str(),
            ExecResult::Failed(r) => r.as_str(),
        }
    }
}

/// Result of one node execution plus how the scheduler should follow up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub result: ExecResult,
    /// Delay before the track is eligible again.
    pub next_delay: Duration,
    /// Whether the cursor moves past the node. Not-ready and lock-busy
    /// nodes are retried in place.
    pub advance: bool,
}

/// How a cast start is recognized for one node.
enum StartCheck<'a> {
    /// The ready pixel stops matching.
    Pixel,
    /// The cast-bar point leaves its baseline.
    CastBar { baseline: Rgb },
    Immediate,
    Expr(&'a ConditionExpr),
}

pub struct NodeExecutor {
    keys: Box<dyn KeySender>,
    sampler: Arc<dyn PixelSampler>,
    completion: Box<dyn CompletionPolicy>,
    shared: Arc<EngineShared>,
    settings: EngineSettings,
    profile: Arc<Profile>,
    plan: CapturePlan,
}

impl NodeExecutor {
    pub fn new(
        keys: Box<dyn KeySender>,
        sampler: Arc<dyn PixelSampler>,
        completion: Box<dyn CompletionPolicy>,
        shared: Arc<EngineShared>,
        settings: EngineSettings,
        profile: Arc<Profile>,
        plan: CapturePlan,
    ) -> Self {
        Self {
            keys,
            sampler,
            completion,
            shared,
            settings,
            profile,
            plan,
        }
    }

    /// Swap in a reloaded profile and the plan built from it.
    pub fn set_profile(&mut self, profile: Arc<Profile>, plan: CapturePlan) {
        self.profile = profile;
        self.plan = plan;
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn execute_skill(&mut self, node: &SkillNode, stop: &StopSignal) -> ExecOutcome {
        let profile = Arc::clone(&self.profile);
        let Some(skill) = profile.skill(&node.skill_id) else {
            warn!(target: "rotabot::executor", node = %node.id, skill = %node.skill_id, "skill not in profile");
            return self.finish(&node.skill_id, &node.skill_id, ExecResult::Skipped(SkipReason::UnknownSkill));
        };
        self.record(skill, |s| s.node_exec += 1);

        if stop.is_raised() {
            return self.finish(&skill.id, skill.display_name(), ExecResult::Skipped(SkipReason::Stopped));
        }
        if !skill.enabled {
            return self.finish(&skill.id, skill.display_name(), ExecResult::Skipped(SkipReason::Disabled));
        }

        if !self.is_ready(skill) {
            self.record(skill, |s| s.ready_false += 1);
            return self.finish(&skill.id, skill.display_name(), ExecResult::Skipped(SkipReason::NotReady));
        }

        if skill.trigger.key.trim().is_empty() {
            return self.finish(&skill.id, skill.display_name(), ExecResult::Failed(FailReason::NoKey));
        }

        let shared = Arc::clone(&self.shared);
        let Some(guard) = shared.cast_lock.try_lock() else {
            trace!(target: "rotabot::executor", skill = %skill.id, "cast lock busy");
            return self.finish(&skill.id, skill.display_name(), ExecResult::Skipped(SkipReason::LockBusy));
        };
        let result = self.attempt(node, skill, stop);
        drop(guard);

        self.finish(&skill.id, skill.display_name(), result)
    }

    /// Send the key and follow the cast through. Called with the cast lock held.
    fn attempt(&mut self, node: &SkillNode, skill: &SkillRecord, stop: &StopSignal) -> ExecResult {
        let cast_ms = u64::from(node.override_cast_ms.unwrap_or(skill.cast.readbar_ms));
        let require_inside = self.settings.pixel_require_inside;
        let profile = Arc::clone(&self.profile);
        let cast_bar = profile.point(&self.settings.cast_bar.point_id);

        let mut start_check = match (&node.start_expr, self.settings.start_signal_mode) {
            (Some(expr), _) => StartCheck::Expr(expr),
            (None, StartSignalMode::Pixel) => StartCheck::Pixel,
            (None, StartSignalMode::None) => StartCheck::Immediate,
            (None, StartSignalMode::CastBar) => {
                match cast_bar.and_then(|p| sample_point(self.sampler.as_ref(), p, require_inside)) {
                    Some(baseline) => StartCheck::CastBar { baseline },
                    None => return ExecResult::Failed(FailReason::CastBarUnavailable),
                }
            }
        };

        if let Err(r) = self.send(skill) {
            return ExecResult::Failed(r);
        }
        if cast_ms == 0 {
            return ExecResult::Success;
        }

        let mut retries_used = 0;
        loop {
            match self.wait_start(skill, &start_check, stop) {
                Poll::Ready(()) => break,
                Poll::Stopped => return ExecResult::Skipped(SkipReason::Stopped),
                Poll::TimedOut if retries_used >= self.settings.max_retries => {
                    debug!(target: "rotabot::executor", skill = %skill.id, retries_used, "no cast start");
                    return ExecResult::Failed(FailReason::NoCastStart);
                }
                Poll::TimedOut => {
                    retries_used += 1;
                    if stop.wait_timeout(Duration::from_millis(self.settings.retry_gap_ms)) {
                        return ExecResult::Skipped(SkipReason::Stopped);
                    }
                    if let StartCheck::CastBar { baseline } = &mut start_check {
                        match cast_bar.and_then(|p| sample_point(self.sampler.as_ref(), p, require_inside)) {
                            Some(rgb) => *baseline = rgb,
                            None => return ExecResult::Failed(FailReason::CastBarUnavailable),
                        }
                    }
                    self.record(skill, |s| s.retry += 1);
                    if let Err(r) = self.send(skill) {
                        return ExecResult::Failed(r);
                    }
                }
            }
        }
        self.record(skill, |s| s.cast_start += 1);

        let completion = match &node.complete_expr {
            Some(expr) => self.wait_expr_complete(expr, cast_ms, stop),
            None => {
                let ctx = CompletionContext {
                    sampler: self.sampler.as_ref(),
                    cast_bar,
                    settings: &self.settings.cast_bar,
                    cast_ms,
                    stop,
                    require_inside,
                };
                self.completion.wait_complete(&ctx)
            }
        };
        match completion {
            Completion::Done => ExecResult::Success,
            Completion::Failed(r) => ExecResult::Failed(r),
            Completion::Stopped => ExecResult::Skipped(SkipReason::Stopped),
        }
    }

    fn send(&mut self, skill: &SkillRecord) -> Result<(), FailReason> {
        self.record(skill, |s| s.attempt += 1);
        self.keys.send_key(&skill.trigger.key).map_err(|e| {
            warn!(target: "rotabot::executor", skill = %skill.id, error = %e, "send_key failed");
            FailReason::SendKeyError
        })
    }

    fn is_ready(&self, skill: &SkillRecord) -> bool {
        let actual = sample_spec(self.sampler.as_ref(), &skill.pixel, self.settings.pixel_require_inside);
        color_match(actual, skill.pixel.color, skill.pixel.tolerance)
    }

    fn wait_start(&self, skill: &SkillRecord, start_check: &StartCheck<'_>, stop: &StopSignal) -> Poll<()> {
        let timeout = Duration::from_millis(self.settings.start_timeout_ms);
        let interval = Duration::from_millis(self.settings.start_poll_ms.max(1));
        let require_inside = self.settings.pixel_require_inside;
        let tolerance = self.settings.cast_bar.tolerance;
        let cast_bar = self.profile.point(&self.settings.cast_bar.point_id);

        stop.poll_until(timeout, interval, || {
            let started = match start_check {
                StartCheck::Immediate => true,
                // An unreadable pixel is not evidence of a start.
                StartCheck::Pixel => sample_spec(self.sampler.as_ref(), &skill.pixel, require_inside)
                    .is_some_and(|rgb| !color_match(Some(rgb), skill.pixel.color, skill.pixel.tolerance)),
                StartCheck::CastBar { baseline } => cast_bar
                    .and_then(|p| sample_point(self.sampler.as_ref(), p, require_inside))
                    .is_some_and(|rgb| !rgb.matches(*baseline, tolerance)),
                StartCheck::Expr(expr) => self.holds(expr),
            };
            started.then_some(())
        })
    }

    fn wait_expr_complete(&self, expr: &ConditionExpr, cast_ms: u64, stop: &StopSignal) -> Completion {
        let factor = self.settings.cast_bar.max_wait_factor.max(0.0);
        let timeout = Duration::from_millis((cast_ms as f64 * factor).round() as u64);
        let interval = Duration::from_millis(self.settings.cast_bar.poll_interval_ms.max(1));
        match stop.poll_until(timeout, interval, || self.holds(expr).then_some(())) {
            Poll::Ready(()) => Completion::Done,
            Poll::TimedOut => Completion::Failed(FailReason::Timeout),
            Poll::Stopped => Completion::Stopped,
        }
    }

    /// Evaluate an inline expression against a fresh frame.
    fn holds(&self, expr: &ConditionExpr) -> bool {
        let frame = self.plan.capture(self.sampler.as_ref(), self.settings.pixel_require_inside);
        let stats = self.shared.stats.snapshot();
        let ctx = EvalContext {
            profile: &self.profile,
            frame: &frame,
            metrics: &stats,
        };
        evaluate(expr, &ctx).is_satisfied()
    }

    fn record(&self, skill: &SkillRecord, f: impl FnOnce(&mut SkillStats)) {
        self.shared.stats.update(&skill.id, skill.display_name(), f);
    }

    fn finish(&self, skill_id: &str, skill_name: &str, result: ExecResult) -> ExecOutcome {
        self.shared.stats.update(skill_id, skill_name, |s| {
            s.last_result = result.label().to_string();
            match result {
                ExecResult::Success => s.success += 1,
                ExecResult::Failed(r) => {
                    s.fail += 1;
                    *s.fail_by_reason.entry(r.as_str().to_string()).or_default() += 1;
                }
                ExecResult::Skipped(_) => {}
            }
        });
        debug!(target: "rotabot::executor", skill = %skill_id, result = result.label(), "skill node finished");

        let (next_delay, advance) = match result {
            ExecResult::Skipped(SkipReason::NotReady | SkipReason::LockBusy) => {
                (Duration::from_millis(self.settings.poll_not_ready_ms), false)
            }
            ExecResult::Skipped(SkipReason::Stopped) => (Duration::ZERO, false),
            _ => (self.skill_gap(), true),
        };
        ExecOutcome {
            result,
            next_delay,
            advance,
        }
    }

    fn skill_gap(&self) -> Duration {
        let jitter = match self.settings.gap_jitter_ms {
            0 => 0,
            n => random_range(0..=n),
        };
        Duration::from_millis(self.settings.default_skill_gap_ms + jitter)
    }
}
