//! Execution engine.
//!
//! - `condition`: tri-state evaluation of condition trees against a pixel frame.
//! - `scheduling`: per-track cursors for global tracks and step-synchronized modes.
//! - `gateway`: control-flow transitions fired by gateway nodes.
//! - `executor`: the skill attempt state machine.
//! - `completion`: pluggable cast completion policies.
//! - `stats`: per-session statistics and the cast lock.
//! - `driver`: the worker loop and the host-facing [`MacroEngine`].

pub mod completion;
pub mod condition;
pub mod driver;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod scheduling;
pub mod stats;

pub use completion::{AssumeSuccess, Completion, CompletionPolicy, RequireSignal, policy_for};
pub use condition::{ConditionSet, EvalContext, Gate, MetricSource, Truth, evaluate};
pub use driver::{
    ChannelScheduler, Command, Cursor, EngineCallbacks, MacroEngine, RunState, Task, TaskQueue, UiScheduler,
};
pub use error::EngineError;
pub use executor::{ExecOutcome, ExecResult, FailReason, NodeExecutor, SkipReason};
pub use gateway::{ActiveRuntime, GatewayEnv};
pub use scheduling::{GlobalRuntime, ModeRuntime, Schedule};
pub use stats::{CastGuard, CastLock, EngineShared, SkillStats, StatsTable};
