use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::color::Rgb;

/// Skill and point records captured by the editor.
///
/// The engine only reads a profile; it never writes recorded colors back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Profile {
    #[serde(default)]
    pub skills: Vec<SkillRecord>,

    #[serde(default)]
    pub points: Vec<PointRecord>,
}

impl Profile {
    pub fn skill(&self, skill_id: &str) -> Option<&SkillRecord> {
        self.skills.iter().find(|s| s.id == skill_id)
    }

    pub fn point(&self, point_id: &str) -> Option<&PointRecord> {
        self.points.iter().find(|p| p.id == point_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkillRecord {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub cast: CastInfo,

    /// Ready-check pixel.
    #[serde(default)]
    pub pixel: PixelSpec,
}

impl SkillRecord {
    /// Name for display, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Key bound to a skill, in the syntax accepted by [`crate::io::keys`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Trigger {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CastInfo {
    /// Nominal cast duration. Zero means instant.
    #[serde(default)]
    pub readbar_ms: u32,
}

/// A recorded screen location with its expected color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct PixelSpec {
    /// Virtual-desktop coordinates.
    #[serde(default)]
    pub vx: i32,
    #[serde(default)]
    pub vy: i32,

    #[serde(default = "default_monitor")]
    pub monitor: String,

    #[serde(default)]
    pub tolerance: u8,

    /// `None` until the editor records a color; such a pixel never matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,

    #[serde(default)]
    pub sample: SampleSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PointRecord {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub vx: i32,
    #[serde(default)]
    pub vy: i32,

    #[serde(default = "default_monitor")]
    pub monitor: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgb>,

    #[serde(default)]
    pub sample: SampleSpec,
}

/// How many pixels to read around a location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub struct SampleSpec {
    #[serde(default)]
    pub mode: SampleMode,

    /// Half-width of the square averaged in `mean` mode.
    #[serde(default)]
    pub radius: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    #[default]
    Single,
    Mean,
}

fn default_true() -> bool {
    true
}

fn default_monitor() -> String {
    "primary".to_string()
}
