//! Configuration module for Rotabot.
//!
//! This module wires together the data models, the recorded profile, engine
//! settings, the pre-flight validator and the loading helpers.
//!
//! Example:
//! use rotabot::config::{Bundle, load_from_path};
//!
//! let bundle = load_from_path("rotation.json")?;

pub mod loader;
pub mod models;
pub mod profile;
pub mod settings;
pub mod validate;

// Re-export core data models
pub use models::{
    Bundle, Condition, ConditionExpr, ConditionGroup, ConditionKind, EntryPoint, EntryScope,
    ExecutionLimits, GatewayAction, GatewayNode, Mode, Node, Preset, SkillNode, Track,
};
pub use profile::{CastInfo, PixelSpec, PointRecord, Profile, SampleMode, SampleSpec, SkillRecord, Trigger};
pub use settings::{CastBarMode, CastBarSettings, EngineSettings, StartSignalMode};
pub use validate::{Diagnostic, Level, Report, validate_preset};

// Re-export loader utilities
pub use loader::{
    check_bundle, generate_schema, load_from_path, load_from_path_async, load_from_reader,
    load_from_str, write_schema_to_writer,
};
