#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Rotabot: a pixel-driven skill rotation engine built on Enigo key injection.
//!
//! A preset describes tracks of skill and gateway nodes, optionally grouped
//! into step-synchronized modes. The engine reads screen pixels to decide
//! when a skill is ready, presses its key, confirms the cast and moves on.
//! - `config`: Preset, profile and settings models, loader, schema and validator.
//! - `engine`: Conditions, scheduling state, gateways, the skill executor and the worker loop.
//! - `io`: Key injection and pixel sampling capabilities.
//! - `utils`: Color matching and interruptible waits.
//! - `watch`: Bundle file watcher for profile hot reload.
//!
//! Use `rotabot::prelude::*` to bring commonly used items into scope quickly.

/// Public module: configuration (models, loader, validator, schema helpers).
pub mod config;
/// Public module: execution engine.
pub mod engine;
/// Public module: key and pixel I/O.
pub mod io;
/// Public module: utilities (color matching, waits).
pub mod utils;
/// Public module: bundle watcher.
pub mod watch;

/// Crate-level constants for consumers that want to inspect package metadata at runtime.
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version (e.g., "0.1.0").
#[inline]
pub const fn version() -> &'static str {
    PKG_VERSION
}

/// Parse a level word (trace|debug|info|warn|error).
pub fn parse_level(s: &str) -> Option<tracing::Level> {
    use tracing::Level;
    match s.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize tracing (logging) with a reasonable default.
/// - Honors the `RUST_LOG` environment variable if set.
/// - Falls back to `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_tracing() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| parse_level(&s))
        .unwrap_or(tracing::Level::INFO);
    init_tracing_with(level);
}

/// Like [`init_tracing`] with an explicit level.
pub fn init_tracing_with(level: tracing::Level) {
    // Ignore the error if the global subscriber was already set.
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// A convenient set of exports for most consumers.
///
/// Bring this into scope with:
/// `use rotabot::prelude::*;`
pub mod prelude {
    // Common result/error handling
    pub use anyhow::{Context, Error, Result, anyhow, bail, ensure};

    // Serialization
    pub use serde::{Deserialize, Serialize};

    // Tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    pub use std::time::Duration;

    pub use crate as rotabot;
    pub use enigo;

    // Frequently used items
    pub use crate::config::{Bundle, EngineSettings, Preset, Profile, validate_preset};
    pub use crate::engine::{ChannelScheduler, EngineCallbacks, EngineError, MacroEngine, UiScheduler};
    pub use crate::io::{EnigoKeySender, KeySender, PixelSampler};
    pub use crate::{config, engine, io, utils};
}
