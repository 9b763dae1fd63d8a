use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::profile::Profile;
use super::settings::EngineSettings;

/// Root document loaded by the binary: engine settings, the recorded
/// profile, and the preset to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Bundle {
    #[serde(default)]
    pub settings: EngineSettings,

    #[serde(default)]
    pub profile: Profile,

    pub preset: Preset,
}

/// A rotation preset: the tracks, modes and conditions the engine runs.
///
/// Presets are authored externally and loaded once per engine start. The
/// engine never mutates a preset; it derives runtime cursors from it instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Preset {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Where execution begins.
    #[serde(default)]
    pub entry: EntryPoint,

    /// Tracks scheduled as independent rings.
    #[serde(default)]
    pub global_tracks: Vec<Track>,

    /// Modes whose tracks share one step barrier.
    #[serde(default)]
    pub modes: Vec<Mode>,

    /// Named conditions referenced by gateways through `condition_id`.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub limits: ExecutionLimits,
}

impl Preset {
    pub fn mode(&self, mode_id: &str) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id == mode_id)
    }

    pub fn condition(&self, condition_id: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.id == condition_id)
    }

    /// Iterate every node of the preset together with its scope and track.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (Option<&Mode>, &Track, &Node)> {
        let global = self
            .global_tracks
            .iter()
            .flat_map(|t| t.nodes.iter().map(move |n| (None, t, n)));
        let moded = self.modes.iter().flat_map(|m| {
            m.tracks
                .iter()
                .flat_map(move |t| t.nodes.iter().map(move |n| (Some(m), t, n)))
        });
        global.chain(moded)
    }
}

/// Resolved starting point of a preset run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub struct EntryPoint {
    #[serde(default)]
    pub scope: EntryScope,

    /// Required iff `scope == mode`.
    #[serde(default)]
    pub mode_id: String,

    #[serde(default)]
    pub track_id: String,

    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryScope {
    #[default]
    Global,
    Mode,
    /// Anything else found in the document; rejected by the validator.
    #[serde(other)]
    Unknown,
}

/// Hard limits on one execution session. Zero means unlimited.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ExecutionLimits {
    #[serde(default)]
    pub max_exec_nodes: u64,

    #[serde(default)]
    pub max_run_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Mode {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// An ordered sequence of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Track {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Track {
    pub fn node_index(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id() == node_id)
    }
}

/// A unit of work on a track, selected with the `kind` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Cast a skill from the profile.
    Skill(SkillNode),
    /// Alter scheduling when a condition holds.
    Gateway(GatewayNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Skill(n) => &n.id,
            Node::Gateway(n) => &n.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Skill(_) => "skill",
            Node::Gateway(_) => "gateway",
        }
    }

    pub fn step_index(&self) -> i32 {
        match self {
            Node::Skill(n) => n.step_index,
            Node::Gateway(n) => n.step_index,
        }
    }

    pub fn order_in_step(&self) -> i32 {
        match self {
            Node::Skill(n) => n.order_in_step,
            Node::Gateway(n) => n.order_in_step,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct SkillNode {
    pub id: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub step_index: i32,

    #[serde(default)]
    pub order_in_step: i32,

    /// Skill record id in the profile.
    pub skill_id: String,

    /// Replaces the skill's `cast.readbar_ms` for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_cast_ms: Option<u32>,

    #[serde(default)]
    pub comment: String,

    /// Start is detected when this expression holds, instead of the configured start signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_expr: Option<ConditionExpr>,

    /// Completion is detected when this expression holds, instead of the completion policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_expr: Option<ConditionExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct GatewayNode {
    pub id: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub step_index: i32,

    #[serde(default)]
    pub order_in_step: i32,

    /// Named condition gating this gateway. Takes precedence over `condition_expr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_id: Option<String>,

    /// Inline condition. A gateway with neither condition fires unconditionally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expr: Option<ConditionExpr>,

    pub action: GatewayAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_mode_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_track_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayAction {
    SwitchMode,
    JumpTrack,
    JumpNode,
    #[default]
    End,
    #[serde(other)]
    Unknown,
}

impl GatewayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayAction::SwitchMode => "switch_mode",
            GatewayAction::JumpTrack => "jump_track",
            GatewayAction::JumpNode => "jump_node",
            GatewayAction::End => "end",
            GatewayAction::Unknown => "unknown",
        }
    }
}

/// A named boolean condition.
///
/// Both representations are accepted: a generic `expr` tree, or the legacy
/// `groups` list (`or` over groups, `and` within a group). [`Condition::to_expr`]
/// unifies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Condition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub kind: ConditionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<ConditionExpr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<ConditionGroup>,
}

impl Condition {
    /// The condition as a single expression tree, or `None` when the
    /// declared representation is missing.
    pub fn to_expr(&self) -> Option<ConditionExpr> {
        match self.kind {
            ConditionKind::Expr => self.expr.clone(),
            ConditionKind::Groups => Some(ConditionExpr::Or {
                children: self
                    .groups
                    .iter()
                    .map(|g| ConditionExpr::And {
                        children: g.atoms.clone(),
                    })
                    .collect(),
            }),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    #[default]
    Expr,
    Groups,
}

/// Legacy condition group: all atoms must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ConditionGroup {
    #[serde(default)]
    pub atoms: Vec<ConditionExpr>,
}

/// Boolean expression tree over pixel and skill-statistic atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionExpr {
    /// A profile point matches its recorded color.
    PixelPoint {
        point_id: String,
        #[serde(default)]
        tolerance: u8,
    },

    /// A skill's ready pixel matches its recorded color.
    PixelSkill {
        skill_id: String,
        /// Falls back to the skill's own tolerance.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<u8>,
    },

    /// A skill statistic reached `count`.
    SkillMetricGe {
        skill_id: String,
        #[serde(default = "default_metric")]
        metric: String,
        count: u64,
    },

    Not {
        child: Box<ConditionExpr>,
    },

    And {
        #[serde(default)]
        children: Vec<ConditionExpr>,
    },

    Or {
        #[serde(default)]
        children: Vec<ConditionExpr>,
    },

    /// An unrecognized `type`; never satisfied and rejected by the validator.
    #[serde(other)]
    Unknown,
}

fn default_metric() -> String {
    "success".to_string()
}
