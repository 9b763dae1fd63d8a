//! Pixel sampling interface and the per-evaluation capture plan.
//!
//! Concrete screen capture lives outside this crate; the engine only talks to
//! a [`PixelSampler`].

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::trace;

use crate::config::{ConditionExpr, PixelSpec, PointRecord, Preset, Profile, SampleSpec};
use crate::utils::color::Rgb;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("({x}, {y}) is outside monitor '{monitor}'")]
    OutOfBounds { x: i32, y: i32, monitor: String },

    #[error("pixel capture unavailable: {0}")]
    Unavailable(String),
}

/// Reads the color at a screen location.
pub trait PixelSampler: Send + Sync {
    fn sample_rgb(
        &self,
        x: i32,
        y: i32,
        sample: &SampleSpec,
        monitor: &str,
        require_inside: bool,
    ) -> Result<Rgb, SampleError>;
}

/// Sample a recorded skill pixel; failures collapse to `None`.
pub fn sample_spec(sampler: &dyn PixelSampler, spec: &PixelSpec, require_inside: bool) -> Option<Rgb> {
    sampler
        .sample_rgb(spec.vx, spec.vy, &spec.sample, &spec.monitor, require_inside)
        .map_err(|e| trace!(target: "rotabot::pixels", error = %e, "skill pixel unreadable"))
        .ok()
}

/// Sample a recorded point; failures collapse to `None`.
pub fn sample_point(sampler: &dyn PixelSampler, point: &PointRecord, require_inside: bool) -> Option<Rgb> {
    sampler
        .sample_rgb(point.vx, point.vy, &point.sample, &point.monitor, require_inside)
        .map_err(|e| trace!(target: "rotabot::pixels", point = %point.id, error = %e, "point unreadable"))
        .ok()
}

/// What a frame entry refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleKey {
    Point(String),
    Skill(String),
}

#[derive(Debug, Clone)]
struct PlannedSample {
    key: SampleKey,
    x: i32,
    y: i32,
    monitor: String,
    sample: SampleSpec,
}

/// The set of locations condition evaluation needs, resolved against a profile.
///
/// Rebuilt only when the profile changes, never in the middle of a tick.
#[derive(Debug, Clone, Default)]
pub struct CapturePlan {
    samples: Vec<PlannedSample>,
}

impl CapturePlan {
    /// Collect every point and skill pixel referenced by the preset's conditions,
    /// gateway expressions and inline node expressions.
    pub fn build(profile: &Profile, preset: &Preset) -> Self {
        let mut keys = BTreeSet::new();
        for cond in &preset.conditions {
            if let Some(expr) = cond.to_expr() {
                collect_keys(&expr, &mut keys);
            }
        }
        for (_, _, node) in preset.iter_nodes() {
            match node {
                crate::config::Node::Skill(s) => {
                    for expr in [&s.start_expr, &s.complete_expr].into_iter().flatten() {
                        collect_keys(expr, &mut keys);
                    }
                }
                crate::config::Node::Gateway(g) => {
                    if let Some(expr) = &g.condition_expr {
                        collect_keys(expr, &mut keys);
                    }
                }
            }
        }
        Self::for_keys(profile, keys)
    }

    /// Plan for an explicit set of keys; ids missing from the profile are dropped.
    pub fn for_keys(profile: &Profile, keys: impl IntoIterator<Item = SampleKey>) -> Self {
        let samples = keys
            .into_iter()
            .filter_map(|key| match &key {
                SampleKey::Point(id) => profile.point(id).map(|p| PlannedSample {
                    x: p.vx,
                    y: p.vy,
                    monitor: p.monitor.clone(),
                    sample: p.sample,
                    key: key.clone(),
                }),
                SampleKey::Skill(id) => profile.skill(id).map(|s| PlannedSample {
                    x: s.pixel.vx,
                    y: s.pixel.vy,
                    monitor: s.pixel.monitor.clone(),
                    sample: s.pixel.sample,
                    key: key.clone(),
                }),
            })
            .collect();
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample every planned location once.
    pub fn capture(&self, sampler: &dyn PixelSampler, require_inside: bool) -> PixelFrame {
        let values = self
            .samples
            .iter()
            .map(|s| {
                let rgb = sampler
                    .sample_rgb(s.x, s.y, &s.sample, &s.monitor, require_inside)
                    .ok();
                (s.key.clone(), rgb)
            })
            .collect();
        PixelFrame { values }
    }
}

fn collect_keys(expr: &ConditionExpr, out: &mut BTreeSet<SampleKey>) {
    match expr {
        ConditionExpr::PixelPoint { point_id, .. } => {
            out.insert(SampleKey::Point(point_id.clone()));
        }
        ConditionExpr::PixelSkill { skill_id, .. } => {
            out.insert(SampleKey::Skill(skill_id.clone()));
        }
        ConditionExpr::Not { child } => collect_keys(child, out),
        ConditionExpr::And { children } | ConditionExpr::Or { children } => {
            for c in children {
                collect_keys(c, out);
            }
        }
        ConditionExpr::SkillMetricGe { .. } | ConditionExpr::Unknown => {}
    }
}

/// Immutable samples taken against one [`CapturePlan`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PixelFrame {
    values: HashMap<SampleKey, Option<Rgb>>,
}

impl PixelFrame {
    /// `None` when the key was not planned or its sample failed.
    pub fn get(&self, key: &SampleKey) -> Option<Rgb> {
        self.values.get(key).copied().flatten()
    }

    pub fn insert(&mut self, key: SampleKey, rgb: Option<Rgb>) {
        self.values.insert(key, rgb);
    }
}

/// Reports the recorded color for any location the profile knows about.
///
/// Every ready check passes and no start signal ever fires, which makes it
/// useful for dry runs with `start_signal_mode = none`.
#[derive(Debug, Clone)]
pub struct ProfileEchoSampler {
    colors: HashMap<(i32, i32, String), Rgb>,
}

impl ProfileEchoSampler {
    pub fn new(profile: &Profile) -> Self {
        let mut colors = HashMap::new();
        for s in &profile.skills {
            if let Some(c) = s.pixel.color {
                colors.insert((s.pixel.vx, s.pixel.vy, s.pixel.monitor.clone()), c);
            }
        }
        for p in &profile.points {
            if let Some(c) = p.color {
                colors.insert((p.vx, p.vy, p.monitor.clone()), c);
            }
        }
        Self { colors }
    }
}

impl PixelSampler for ProfileEchoSampler {
    fn sample_rgb(
        &self,
        x: i32,
        y: i32,
        _sample: &SampleSpec,
        monitor: &str,
        _require_inside: bool,
    ) -> Result<Rgb, SampleError> {
        self.colors
            .get(&(x, y, monitor.to_string()))
            .copied()
            .ok_or_else(|| SampleError::Unavailable(format!("no recorded color at ({x}, {y})")))
    }
}
