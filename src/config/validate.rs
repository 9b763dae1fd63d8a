//! Pre-flight structural checks for a preset.
//!
//! The engine refuses to start while the report holds any `error` entry.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::models::{
    Condition, ConditionExpr, ConditionKind, EntryScope, GatewayAction, GatewayNode, Mode, Node,
    Preset, Track,
};
use super::profile::Profile;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub code: &'static str,
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == Level::Error)
    }

    pub fn count(&self, level: Level) -> usize {
        self.diagnostics.iter().filter(|d| d.level == level).count()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    /// Multi-line human-readable rendering, most severe entries first.
    pub fn render(&self) -> String {
        let mut sorted: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        sorted.sort_by(|a, b| b.level.cmp(&a.level));
        let mut out = format!(
            "{} error(s), {} warning(s), {} info",
            self.count(Level::Error),
            self.count(Level::Warning),
            self.count(Level::Info)
        );
        for d in sorted {
            out.push_str(&format!("\n[{}] {} at {}: {}", d.level, d.code, d.path, d.message));
            if let Some(detail) = &d.detail {
                out.push_str(&format!(" ({detail})"));
            }
        }
        out
    }

    fn push(&mut self, level: Level, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            level,
            code,
            path: path.into(),
            message: message.into(),
            detail: None,
        });
    }

    fn error(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.push(Level::Error, code, path, message);
    }

    fn warn(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.push(Level::Warning, code, path, message);
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Validate `preset`. When `profile` is given, skill and point references are
/// checked against it; otherwise those checks are skipped with one info entry.
pub fn validate_preset(preset: &Preset, profile: Option<&Profile>) -> Report {
    let mut v = Validator {
        preset,
        profile,
        report: Report::default(),
    };
    if profile.is_none() {
        v.report.push(
            Level::Info,
            "refs.skipped",
            "profile",
            "no profile supplied; skill and point references were not checked",
        );
    }
    v.check_ids();
    v.check_tracks();
    v.check_conditions();
    v.check_entry();
    v.report
}

struct Validator<'a> {
    preset: &'a Preset,
    profile: Option<&'a Profile>,
    report: Report,
}

impl<'a> Validator<'a> {
    fn check_ids(&mut self) {
        let preset = self.preset;

        let mode_ids = preset.modes.iter().enumerate().map(|(i, m)| (format!("modes[{i}]"), m.id.as_str()));
        self.unique_ids("mode", mode_ids);

        let global = preset
            .global_tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("global_tracks[{i}]"), t.id.as_str()));
        self.unique_ids("track", global);

        for (mi, mode) in preset.modes.iter().enumerate() {
            let tracks = mode
                .tracks
                .iter()
                .enumerate()
                .map(move |(ti, t)| (format!("modes[{mi}].tracks[{ti}]"), t.id.as_str()));
            self.unique_ids("track", tracks);
        }

        let nodes: Vec<(String, &str)> = self
            .tracks_with_paths()
            .into_iter()
            .flat_map(|(path, _, track)| {
                track
                    .nodes
                    .iter()
                    .enumerate()
                    .map(move |(ni, n)| (format!("{path}.nodes[{ni}]"), n.id()))
            })
            .collect();
        self.unique_ids("node", nodes);

        let conditions = preset
            .conditions
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("conditions[{i}]"), c.id.as_str()));
        self.unique_ids("condition", conditions);
    }

    fn unique_ids<'s>(&mut self, what: &str, ids: impl IntoIterator<Item = (String, &'s str)>) {
        let mut seen = HashSet::new();
        for (path, id) in ids {
            if id.trim().is_empty() {
                self.report.error("id.empty", format!("{path}.id"), format!("{what} id is empty"));
            } else if !seen.insert(id) {
                self.report.error(
                    "id.duplicate",
                    format!("{path}.id"),
                    format!("duplicate {what} id '{id}'"),
                );
            }
        }
    }

    /// Every track with its path and owning mode (if any).
    fn tracks_with_paths(&self) -> Vec<(String, Option<&'a Mode>, &'a Track)> {
        let preset = self.preset;
        let mut out: Vec<(String, Option<&'a Mode>, &'a Track)> = preset
            .global_tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("global_tracks[{i}]"), None, t))
            .collect();
        for (mi, mode) in preset.modes.iter().enumerate() {
            for (ti, t) in mode.tracks.iter().enumerate() {
                out.push((format!("modes[{mi}].tracks[{ti}]"), Some(mode), t));
            }
        }
        out
    }

    fn check_tracks(&mut self) {
        for (path, mode, track) in self.tracks_with_paths() {
            if mode.is_some() {
                self.check_unique_steps(&path, track);
            }
            for (ni, node) in track.nodes.iter().enumerate() {
                let npath = format!("{path}.nodes[{ni}]");
                match node {
                    Node::Skill(skill) => {
                        if skill.skill_id.trim().is_empty() {
                            self.report.error(
                                "skill.missing_id",
                                format!("{npath}.skill_id"),
                                "skill node has no skill_id",
                            );
                        } else {
                            self.check_skill_ref(&skill.skill_id, &format!("{npath}.skill_id"));
                        }
                        if let Some(expr) = &skill.start_expr {
                            self.check_expr(expr, &format!("{npath}.start_expr"));
                        }
                        if let Some(expr) = &skill.complete_expr {
                            self.check_expr(expr, &format!("{npath}.complete_expr"));
                        }
                    }
                    Node::Gateway(gw) => self.check_gateway(gw, mode, track, &npath),
                }
            }
        }
    }

    fn check_unique_steps(&mut self, path: &str, track: &Track) {
        let mut by_step: BTreeMap<i32, usize> = BTreeMap::new();
        for node in &track.nodes {
            *by_step.entry(node.step_index()).or_default() += 1;
        }
        for (step, n) in by_step.into_iter().filter(|(_, n)| *n > 1) {
            self.report.error(
                "track.duplicate_step",
                path.to_string(),
                format!("track '{}' has {n} nodes at step {step}", track.id),
            );
        }
    }

    fn check_gateway(&mut self, gw: &GatewayNode, mode: Option<&Mode>, track: &Track, path: &str) {
        let preset = self.preset;
        if let Some(cid) = &gw.condition_id {
            if preset.condition(cid).is_none() {
                self.report.error(
                    "gateway.unknown_condition",
                    format!("{path}.condition_id"),
                    format!("condition '{cid}' does not exist"),
                );
            }
        } else if let Some(expr) = &gw.condition_expr {
            self.check_expr(expr, &format!("{path}.condition_expr"));
        }

        let target_mode = non_empty(&gw.target_mode_id);
        let target_track = non_empty(&gw.target_track_id);
        let target_node = non_empty(&gw.target_node_id);

        match gw.action {
            GatewayAction::End => {}
            GatewayAction::Unknown => {
                self.report.error(
                    "gateway.unknown_action",
                    format!("{path}.action"),
                    "action must be one of switch_mode, jump_track, jump_node, end",
                );
            }
            GatewayAction::SwitchMode => match target_mode {
                None => self.report.error(
                    "gateway.missing_target_mode",
                    format!("{path}.target_mode_id"),
                    "switch_mode requires target_mode_id",
                ),
                Some(mid) if preset.mode(mid).is_none() => self.report.error(
                    "gateway.unknown_target_mode",
                    format!("{path}.target_mode_id"),
                    format!("mode '{mid}' does not exist"),
                ),
                Some(_) => {}
            },
            GatewayAction::JumpNode => match target_node {
                None => self.report.error(
                    "gateway.missing_target_node",
                    format!("{path}.target_node_id"),
                    "jump_node requires target_node_id",
                ),
                Some(nid) if track.node_index(nid).is_none() => self.report.error(
                    "gateway.unknown_target_node",
                    format!("{path}.target_node_id"),
                    format!("node '{nid}' is not on track '{}'", track.id),
                ),
                Some(_) => {}
            },
            GatewayAction::JumpTrack => {
                let Some(tid) = target_track else {
                    self.report.error(
                        "gateway.missing_target_track",
                        format!("{path}.target_track_id"),
                        "jump_track requires target_track_id",
                    );
                    return;
                };

                let scope_tracks: &[Track] = match (mode, target_mode) {
                    (None, Some(_)) => {
                        self.report.warn(
                            "gateway.cross_scope_ignored",
                            format!("{path}.target_mode_id"),
                            "global tracks cannot jump into a mode; the gateway only advances",
                        );
                        return;
                    }
                    (None, None) => &preset.global_tracks,
                    (Some(current), Some(mid)) if mid != current.id => {
                        let Some(foreign) = preset.mode(mid) else {
                            self.report.error(
                                "gateway.unknown_target_mode",
                                format!("{path}.target_mode_id"),
                                format!("mode '{mid}' does not exist"),
                            );
                            return;
                        };
                        self.report.warn(
                            "gateway.jump_track_switches_mode",
                            format!("{path}.target_mode_id"),
                            format!("jump_track into mode '{mid}' runs as switch_mode; track target is ignored"),
                        );
                        &foreign.tracks
                    }
                    (Some(current), _) => &current.tracks,
                };

                match scope_tracks.iter().find(|t| t.id == tid) {
                    None => self.report.error(
                        "gateway.unknown_target_track",
                        format!("{path}.target_track_id"),
                        format!("track '{tid}' does not exist in the acting scope"),
                    ),
                    Some(t) => {
                        if let Some(nid) = target_node {
                            if t.node_index(nid).is_none() {
                                self.report.error(
                                    "gateway.unknown_target_node",
                                    format!("{path}.target_node_id"),
                                    format!("node '{nid}' is not on track '{tid}'"),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn check_conditions(&mut self) {
        for (i, cond) in self.preset.conditions.iter().enumerate() {
            let path = format!("conditions[{i}]");
            self.check_condition(cond, &path);
        }
    }

    fn check_condition(&mut self, cond: &Condition, path: &str) {
        match cond.kind {
            ConditionKind::Expr => match &cond.expr {
                Some(expr) => self.check_expr(expr, &format!("{path}.expr")),
                None => self.report.error(
                    "condition.missing_expr",
                    format!("{path}.expr"),
                    format!("condition '{}' has no expression", cond.id),
                ),
            },
            ConditionKind::Groups => {
                for (gi, group) in cond.groups.iter().enumerate() {
                    let gpath = format!("{path}.groups[{gi}]");
                    if group.atoms.is_empty() {
                        self.report.warn(
                            "condition.empty_and",
                            gpath.clone(),
                            "empty group never holds",
                        );
                    }
                    for (ai, atom) in group.atoms.iter().enumerate() {
                        self.check_expr(atom, &format!("{gpath}.atoms[{ai}]"));
                    }
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &ConditionExpr, path: &str) {
        match expr {
            ConditionExpr::Unknown => self.report.error(
                "condition.unknown_type",
                format!("{path}.type"),
                "type must be one of pixel_point, pixel_skill, skill_metric_ge, not, and, or",
            ),
            ConditionExpr::PixelPoint { point_id, .. } => {
                if point_id.trim().is_empty() {
                    self.report.error("condition.missing_point", format!("{path}.point_id"), "point_id is empty");
                } else {
                    self.check_point_ref(point_id, &format!("{path}.point_id"));
                }
            }
            ConditionExpr::PixelSkill { skill_id, .. } => {
                self.check_atom_skill(skill_id, path);
            }
            ConditionExpr::SkillMetricGe { skill_id, metric, count } => {
                self.check_atom_skill(skill_id, path);
                if metric != "success" {
                    self.report.error(
                        "condition.unknown_metric",
                        format!("{path}.metric"),
                        format!("metric '{metric}' is not supported (only 'success')"),
                    );
                }
                if *count < 1 {
                    self.report.error("condition.bad_count", format!("{path}.count"), "count must be >= 1");
                }
            }
            ConditionExpr::Not { child } => self.check_expr(child, &format!("{path}.child")),
            ConditionExpr::And { children } => {
                if children.is_empty() {
                    self.report.warn("condition.empty_and", path.to_string(), "empty 'and' never holds");
                }
                for (i, c) in children.iter().enumerate() {
                    self.check_expr(c, &format!("{path}.children[{i}]"));
                }
            }
            ConditionExpr::Or { children } => {
                for (i, c) in children.iter().enumerate() {
                    self.check_expr(c, &format!("{path}.children[{i}]"));
                }
            }
        }
    }

    fn check_atom_skill(&mut self, skill_id: &str, path: &str) {
        if skill_id.trim().is_empty() {
            self.report.error("condition.missing_skill", format!("{path}.skill_id"), "skill_id is empty");
        } else {
            self.check_skill_ref(skill_id, &format!("{path}.skill_id"));
        }
    }

    fn check_skill_ref(&mut self, skill_id: &str, path: &str) {
        if let Some(profile) = self.profile {
            if profile.skill(skill_id).is_none() {
                self.report.error(
                    "ref.unknown_skill",
                    path.to_string(),
                    format!("skill '{skill_id}' is not in the profile"),
                );
            }
        }
    }

    fn check_point_ref(&mut self, point_id: &str, path: &str) {
        if let Some(profile) = self.profile {
            if profile.point(point_id).is_none() {
                self.report.error(
                    "ref.unknown_point",
                    path.to_string(),
                    format!("point '{point_id}' is not in the profile"),
                );
            }
        }
    }

    fn check_entry(&mut self) {
        let preset = self.preset;
        let entry = &preset.entry;
        let tracks: &[Track] = match entry.scope {
            EntryScope::Unknown => {
                self.report.error("entry.bad_scope", "entry.scope", "scope must be 'global' or 'mode'");
                return;
            }
            EntryScope::Global => {
                if !entry.mode_id.is_empty() {
                    self.report.error(
                        "entry.unexpected_mode",
                        "entry.mode_id",
                        "mode_id must be empty when scope is 'global'",
                    );
                }
                &preset.global_tracks
            }
            EntryScope::Mode => {
                if entry.mode_id.trim().is_empty() {
                    self.report.error("entry.missing_mode", "entry.mode_id", "mode_id is required when scope is 'mode'");
                    return;
                }
                match preset.mode(&entry.mode_id) {
                    Some(mode) => &mode.tracks,
                    None => {
                        self.report.error(
                            "entry.unknown_mode",
                            "entry.mode_id",
                            format!("mode '{}' does not exist", entry.mode_id),
                        );
                        return;
                    }
                }
            }
        };

        if entry.track_id.trim().is_empty() {
            self.report.error("entry.missing_track", "entry.track_id", "entry track_id is empty");
        }
        if entry.node_id.trim().is_empty() {
            self.report.error("entry.missing_node", "entry.node_id", "entry node_id is empty");
        }
        if entry.track_id.trim().is_empty() || entry.node_id.trim().is_empty() {
            return;
        }

        match tracks.iter().find(|t| t.id == entry.track_id) {
            None => self.report.error(
                "entry.unknown_track",
                "entry.track_id",
                format!("track '{}' does not exist in the entry scope", entry.track_id),
            ),
            Some(track) if track.node_index(&entry.node_id).is_none() => self.report.error(
                "entry.unknown_node",
                "entry.node_id",
                format!("node '{}' is not on track '{}'", entry.node_id, entry.track_id),
            ),
            Some(_) => {}
        }
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> Profile {
        serde_json::from_value(json!({
            "skills": [{ "id": "fire" }, { "id": "ice" }],
            "points": [{ "id": "hp" }]
        }))
        .unwrap()
    }

    fn valid_preset() -> Preset {
        serde_json::from_value(json!({
            "id": "p",
            "entry": { "scope": "mode", "mode_id": "m1", "track_id": "a", "node_id": "a1" },
            "global_tracks": [{ "id": "g", "nodes": [ { "kind": "skill", "id": "g1", "skill_id": "fire" } ] }],
            "modes": [
                { "id": "m1", "tracks": [
                    { "id": "a", "nodes": [
                        { "kind": "skill", "id": "a1", "skill_id": "fire", "step_index": 0 },
                        { "kind": "gateway", "id": "a2", "action": "jump_track", "step_index": 1,
                          "target_track_id": "b", "target_node_id": "b1", "condition_id": "low_hp" }
                    ] },
                    { "id": "b", "nodes": [ { "kind": "skill", "id": "b1", "skill_id": "ice" } ] }
                ] },
                { "id": "m2", "tracks": [ { "id": "a", "nodes": [
                    { "kind": "gateway", "id": "back", "action": "switch_mode", "target_mode_id": "m1" }
                ] } ] }
            ],
            "conditions": [
                { "id": "low_hp", "expr": { "type": "and", "children": [
                    { "type": "pixel_point", "point_id": "hp", "tolerance": 12 },
                    { "type": "not", "child": { "type": "skill_metric_ge", "skill_id": "ice", "count": 3 } }
                ] } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn valid_preset_has_no_errors() {
        let report = validate_preset(&valid_preset(), Some(&profile()));
        assert!(!report.has_errors(), "{}", report.render());
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn missing_profile_is_only_informational() {
        let report = validate_preset(&valid_preset(), None);
        assert!(!report.has_errors());
        assert!(report.has_code("refs.skipped"));
        assert_eq!(report.count(Level::Info), 1);
    }

    #[test]
    fn unknown_references_are_errors_with_a_profile() {
        let mut preset = valid_preset();
        if let Node::Skill(s) = &mut preset.global_tracks[0].nodes[0] {
            s.skill_id = "lightning".into();
        }
        let report = validate_preset(&preset, Some(&profile()));
        assert!(report.has_code("ref.unknown_skill"));
        assert!(report.has_errors());
    }

    #[test]
    fn duplicate_and_empty_ids_are_reported() {
        let mut preset = valid_preset();
        let dup = preset.global_tracks[0].nodes[0].clone();
        preset.modes[0].tracks[1].nodes.push(dup);
        preset.conditions.push(Condition { id: String::new(), ..Default::default() });
        let report = validate_preset(&preset, None);
        assert!(report.has_code("id.duplicate"));
        assert!(report.has_code("id.empty"));
    }

    #[test]
    fn track_ids_may_repeat_across_modes() {
        // Both m1 and m2 have a track "a".
        let report = validate_preset(&valid_preset(), None);
        assert!(!report.has_code("id.duplicate"));
    }

    #[test]
    fn gateway_targets_must_resolve() {
        let preset: Preset = serde_json::from_value(json!({
            "id": "p",
            "entry": { "scope": "global", "track_id": "g", "node_id": "x" },
            "global_tracks": [{ "id": "g", "nodes": [
                { "kind": "gateway", "id": "x", "action": "switch_mode" },
                { "kind": "gateway", "id": "y", "action": "switch_mode", "target_mode_id": "ghost" },
                { "kind": "gateway", "id": "z", "action": "jump_node", "target_node_id": "elsewhere" },
                { "kind": "gateway", "id": "w", "action": "jump_track" },
                { "kind": "gateway", "id": "v", "action": "jump_track", "target_track_id": "nope" },
                { "kind": "gateway", "id": "u", "action": "jump_track", "target_track_id": "g", "target_mode_id": "m" },
                { "kind": "gateway", "id": "t", "action": "fly" },
                { "kind": "gateway", "id": "s", "action": "end", "condition_id": "missing" }
            ] }]
        }))
        .unwrap();
        let report = validate_preset(&preset, None);
        for code in [
            "gateway.missing_target_mode",
            "gateway.unknown_target_mode",
            "gateway.unknown_target_node",
            "gateway.missing_target_track",
            "gateway.unknown_target_track",
            "gateway.cross_scope_ignored",
            "gateway.unknown_action",
            "gateway.unknown_condition",
        ] {
            assert!(report.has_code(code), "missing {code}: {}", report.render());
        }
    }

    #[test]
    fn foreign_mode_jump_track_is_a_warning() {
        let mut preset = valid_preset();
        if let Node::Gateway(gw) = &mut preset.modes[0].tracks[0].nodes[1] {
            gw.target_mode_id = Some("m2".into());
            gw.target_track_id = Some("a".into());
            gw.target_node_id = None;
        }
        let report = validate_preset(&preset, None);
        assert!(!report.has_errors(), "{}", report.render());
        assert!(report.has_code("gateway.jump_track_switches_mode"));
    }

    #[test]
    fn condition_atoms_are_checked() {
        let mut preset = valid_preset();
        preset.conditions.push(
            serde_json::from_value(json!({ "id": "bad", "expr": { "type": "or", "children": [
                { "type": "ocr" },
                { "type": "skill_metric_ge", "skill_id": "fire", "metric": "fail", "count": 0 },
                { "type": "and", "children": [] }
            ] } }))
            .unwrap(),
        );
        preset.conditions.push(Condition { id: "none".into(), ..Default::default() });
        let report = validate_preset(&preset, Some(&profile()));
        for code in [
            "condition.unknown_type",
            "condition.unknown_metric",
            "condition.bad_count",
            "condition.empty_and",
            "condition.missing_expr",
        ] {
            assert!(report.has_code(code), "missing {code}");
        }
    }

    #[test]
    fn mode_tracks_reject_shared_steps() {
        let mut preset = valid_preset();
        if let Node::Gateway(gw) = &mut preset.modes[0].tracks[0].nodes[1] {
            gw.step_index = 0;
        }
        let report = validate_preset(&preset, None);
        assert!(report.has_code("track.duplicate_step"));
    }

    #[test]
    fn entry_point_requires_track_and_node() {
        let mut preset = valid_preset();
        preset.entry.track_id.clear();
        preset.entry.node_id.clear();
        let report = validate_preset(&preset, None);
        assert!(report.has_code("entry.missing_track"));
        assert!(report.has_code("entry.missing_node"));
        assert!(report.render().starts_with("2 error(s)"));
    }

    #[test]
    fn entry_point_scope_rules() {
        let mut preset = valid_preset();
        preset.entry.mode_id.clear();
        assert!(validate_preset(&preset, None).has_code("entry.missing_mode"));

        preset.entry.scope = EntryScope::Global;
        preset.entry.track_id = "g".into();
        preset.entry.node_id = "nope".into();
        assert!(validate_preset(&preset, None).has_code("entry.unknown_node"));

        preset.entry.mode_id = "m1".into();
        assert!(validate_preset(&preset, None).has_code("entry.unexpected_mode"));

        preset.entry.scope = EntryScope::Unknown;
        assert!(validate_preset(&preset, None).has_code("entry.bad_scope"));
    }
}
