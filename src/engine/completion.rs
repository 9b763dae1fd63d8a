//! Strategies deciding when a started cast has finished.

use std::time::Duration;

use tracing::trace;

use crate::config::{CastBarMode, CastBarSettings, PointRecord};
use crate::engine::executor::FailReason;
use crate::io::pixels::{PixelSampler, sample_point};
use crate::utils::wait::{Poll, StopSignal};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Completion {
    Done,
    Failed(FailReason),
    Stopped,
}

/// What a policy may observe while waiting.
pub struct CompletionContext<'a> {
    pub sampler: &'a dyn PixelSampler,
    /// The configured cast-bar point, if it exists in the profile.
    pub cast_bar: Option<&'a PointRecord>,
    pub settings: &'a CastBarSettings,
    /// Effective cast duration of the node.
    pub cast_ms: u64,
    pub stop: &'a StopSignal,
    pub require_inside: bool,
}

impl CompletionContext<'_> {
    /// `cast_ms * max_wait_factor`.
    pub fn max_wait(&self) -> Duration {
        let ms = self.cast_ms as f64 * self.settings.max_wait_factor.max(0.0);
        Duration::from_millis(ms.round() as u64)
    }
}

pub trait CompletionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn wait_complete(&self, ctx: &CompletionContext<'_>) -> Completion;
}

/// Returns immediately; the cast is trusted to finish.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeSuccess;

impl CompletionPolicy for AssumeSuccess {
    fn name(&self) -> &'static str {
        "assume_success"
    }

    fn wait_complete(&self, _ctx: &CompletionContext<'_>) -> Completion {
        Completion::Done
    }
}

/// Polls the cast-bar point until it moves away from the color it had when
/// the wait began.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequireSignal;

impl CompletionPolicy for RequireSignal {
    fn name(&self) -> &'static str {
        "require_signal"
    }

    fn wait_complete(&self, ctx: &CompletionContext<'_>) -> Completion {
        let Some(point) = ctx.cast_bar else {
            return Completion::Failed(FailReason::CastBarUnavailable);
        };
        let Some(baseline) = sample_point(ctx.sampler, point, ctx.require_inside) else {
            return Completion::Failed(FailReason::CastBarUnavailable);
        };
        let tolerance = ctx.settings.tolerance;
        let interval = Duration::from_millis(ctx.settings.poll_interval_ms.max(1));

        let polled = ctx.stop.poll_until(ctx.max_wait(), interval, || {
            sample_point(ctx.sampler, point, ctx.require_inside)
                .filter(|now| !now.matches(baseline, tolerance))
        });
        match polled {
            Poll::Ready(rgb) => {
                trace!(target: "rotabot::executor", %baseline, now = %rgb, "cast bar changed");
                Completion::Done
            }
            Poll::TimedOut => Completion::Failed(FailReason::Timeout),
            Poll::Stopped => Completion::Stopped,
        }
    }
}

/// Policy selected by `cast_bar.mode`.
pub fn policy_for(mode: CastBarMode) -> Box<dyn CompletionPolicy> {
    match mode {
        CastBarMode::Timer => Box::new(AssumeSuccess),
        CastBarMode::Bar => Box::new(RequireSignal),
    }
}
