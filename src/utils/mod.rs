//! Utilities for Rotabot.
//!
//! Submodules:
//! - `color`: RGB triples and the Chebyshev tolerance match used by every pixel check.
//! - `wait`: The cooperative stop signal and interruptible sleeps used by the worker.

pub mod color;
pub mod wait;
