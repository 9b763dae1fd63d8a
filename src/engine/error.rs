use thiserror::Error;

use crate::config::Report;

/// Errors surfaced by [`crate::engine::MacroEngine`]'s control methods.
///
/// Skill failures are not errors; they are recorded in the stats table.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("preset validation failed\n{0}")]
    Validation(Report),

    #[error("invalid engine settings: {0}")]
    InvalidSettings(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}
