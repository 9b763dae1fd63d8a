//! Tri-state evaluation of condition expressions.
//!
//! Evaluation reads only an immutable [`PixelFrame`] and a statistics
//! snapshot, so evaluating the same expression twice against the same
//! inputs always yields the same answer.

use std::collections::HashMap;

use crate::config::{ConditionExpr, GatewayNode, Preset, Profile};
use crate::engine::stats::SkillStats;
use crate::io::pixels::{PixelFrame, SampleKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    /// Missing data: unreadable pixel, unrecorded color, unknown id.
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b { Truth::True } else { Truth::False }
    }

    pub fn negate(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Gating treats `Unknown` as not satisfied.
    pub fn is_satisfied(self) -> bool {
        self == Truth::True
    }
}

/// Source of skill statistics for `skill_metric_ge` atoms.
pub trait MetricSource {
    /// `None` for metrics that are not tracked.
    fn metric(&self, skill_id: &str, metric: &str) -> Option<u64>;
}

impl MetricSource for Vec<SkillStats> {
    fn metric(&self, skill_id: &str, metric: &str) -> Option<u64> {
        if metric != "success" {
            return None;
        }
        Some(
            self.iter()
                .find(|s| s.skill_id == skill_id)
                .map_or(0, |s| s.success),
        )
    }
}

/// Everything an evaluation may look at.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub profile: &'a Profile,
    pub frame: &'a PixelFrame,
    pub metrics: &'a dyn MetricSource,
}

pub fn evaluate(expr: &ConditionExpr, ctx: &EvalContext<'_>) -> Truth {
    match expr {
        ConditionExpr::PixelPoint {
            point_id,
            tolerance,
        } => {
            let Some(expected) = ctx.profile.point(point_id).and_then(|p| p.color) else {
                return Truth::Unknown;
            };
            match ctx.frame.get(&SampleKey::Point(point_id.clone())) {
                Some(actual) => Truth::from_bool(actual.matches(expected, *tolerance)),
                None => Truth::Unknown,
            }
        }
        ConditionExpr::PixelSkill {
            skill_id,
            tolerance,
        } => {
            let Some(skill) = ctx.profile.skill(skill_id) else {
                return Truth::Unknown;
            };
            let Some(expected) = skill.pixel.color else {
                return Truth::Unknown;
            };
            let tol = tolerance.unwrap_or(skill.pixel.tolerance);
            match ctx.frame.get(&SampleKey::Skill(skill_id.clone())) {
                Some(actual) => Truth::from_bool(actual.matches(expected, tol)),
                None => Truth::Unknown,
            }
        }
        ConditionExpr::SkillMetricGe {
            skill_id,
            metric,
            count,
        } => match ctx.metrics.metric(skill_id, metric) {
            Some(v) => Truth::from_bool(v >= *count),
            None => Truth::Unknown,
        },
        ConditionExpr::Not { child } => evaluate(child, ctx).negate(),
        ConditionExpr::And { children } => {
            // An empty group never holds, matching the legacy group semantics.
            if children.is_empty() {
                return Truth::False;
            }
            let mut acc = Truth::True;
            for c in children {
                match evaluate(c, ctx) {
                    Truth::False => return Truth::False,
                    Truth::Unknown => acc = Truth::Unknown,
                    Truth::True => {}
                }
            }
            acc
        }
        ConditionExpr::Or { children } => {
            let mut acc = Truth::False;
            for c in children {
                match evaluate(c, ctx) {
                    Truth::True => return Truth::True,
                    Truth::Unknown => acc = Truth::Unknown,
                    Truth::False => {}
                }
            }
            acc
        }
        ConditionExpr::Unknown => Truth::Unknown,
    }
}

/// How a gateway is gated.
#[derive(Debug, Clone, Copy)]
pub enum Gate<'a> {
    /// No condition: fire every time.
    Always,
    Expr(&'a ConditionExpr),
    /// `condition_id` names nothing; never fires.
    Missing,
}

/// Named conditions resolved to expression trees once per session.
#[derive(Debug, Clone, Default)]
pub struct ConditionSet {
    by_id: HashMap<String, ConditionExpr>,
}

impl ConditionSet {
    pub fn compile(preset: &Preset) -> Self {
        let by_id = preset
            .conditions
            .iter()
            .filter_map(|c| c.to_expr().map(|e| (c.id.clone(), e)))
            .collect();
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&ConditionExpr> {
        self.by_id.get(id)
    }

    pub fn gate<'a>(&'a self, node: &'a GatewayNode) -> Gate<'a> {
        match (&node.condition_id, &node.condition_expr) {
            (Some(id), _) => self.get(id).map_or(Gate::Missing, Gate::Expr),
            (None, Some(expr)) => Gate::Expr(expr),
            (None, None) => Gate::Always,
        }
    }
}
