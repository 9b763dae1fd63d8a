//! Control-flow transitions triggered by gateway nodes.
//!
//! Every function here takes the active runtime by value and returns the
//! runtime that should be active afterwards. Only `switch_mode` replaces it;
//! all other branches mutate cursors in place.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{GatewayAction, GatewayNode};
use crate::engine::scheduling::{GlobalRuntime, ModeRuntime, Schedule};
use crate::utils::wait::StopSignal;

/// The scheduling state currently driving the loop.
#[derive(Debug, Clone)]
pub enum ActiveRuntime {
    Global(GlobalRuntime),
    Mode(ModeRuntime),
}

impl ActiveRuntime {
    pub fn mode_id(&self) -> Option<&str> {
        match self {
            ActiveRuntime::Global(_) => None,
            ActiveRuntime::Mode(rt) => Some(rt.mode_id()),
        }
    }

    pub fn schedule(&self) -> &dyn Schedule {
        match self {
            ActiveRuntime::Global(rt) => rt as &dyn Schedule,
            ActiveRuntime::Mode(rt) => rt as &dyn Schedule,
        }
    }

    pub fn schedule_mut(&mut self) -> &mut dyn Schedule {
        match self {
            ActiveRuntime::Global(rt) => rt as &mut dyn Schedule,
            ActiveRuntime::Mode(rt) => rt as &mut dyn Schedule,
        }
    }
}

/// Inputs a gateway transition may use besides the runtime itself.
pub struct GatewayEnv<'a> {
    pub now: Instant,
    /// Delay before the triggering track is polled again.
    pub poll_delay: Duration,
    pub stop: &'a StopSignal,
    /// Set by `end`; read by the loop when it halts.
    pub stop_reason: &'a mut Option<String>,
    /// Builds a fresh runtime for a mode id, or `None` if it cannot.
    pub build_mode: &'a dyn Fn(&str) -> Option<ModeRuntime>,
}

impl GatewayEnv<'_> {
    fn end(&mut self, node: &GatewayNode) {
        info!(target: "rotabot::gateway", node = %node.id, "end gateway reached");
        *self.stop_reason = Some(format!("end:{}", node.id));
        self.stop.raise();
    }

    fn switch(&self, node: &GatewayNode, mode_id: Option<&str>) -> Option<ModeRuntime> {
        let Some(mode_id) = mode_id else {
            warn!(target: "rotabot::gateway", node = %node.id, "switch_mode without target mode");
            return None;
        };
        let built = (self.build_mode)(mode_id);
        match &built {
            Some(_) => info!(target: "rotabot::gateway", node = %node.id, mode = %mode_id, "switching mode"),
            None => warn!(target: "rotabot::gateway", node = %node.id, mode = %mode_id, "mode runtime could not be built"),
        }
        built
    }

    fn poll_again<S: Schedule + ?Sized>(&self, rt: &mut S, track_id: &str) {
        rt.set_next_at(track_id, self.now + self.poll_delay);
    }
}

/// Apply `node`'s action, fired from `track_id`, to whichever runtime is active.
pub fn apply(
    node: &GatewayNode,
    track_id: &str,
    runtime: ActiveRuntime,
    env: &mut GatewayEnv<'_>,
) -> ActiveRuntime {
    match runtime {
        ActiveRuntime::Global(rt) => apply_gateway_global(node, track_id, rt, env),
        ActiveRuntime::Mode(rt) => apply_gateway_mode(node, track_id, rt, env),
    }
}

/// A gateway whose condition did not hold: step past it and poll soon.
pub fn pass_through(track_id: &str, runtime: &mut ActiveRuntime, env: &GatewayEnv<'_>) {
    let rt = runtime.schedule_mut();
    rt.advance(track_id);
    env.poll_again(rt, track_id);
}

pub fn apply_gateway_global(
    node: &GatewayNode,
    track_id: &str,
    mut rt: GlobalRuntime,
    env: &mut GatewayEnv<'_>,
) -> ActiveRuntime {
    let target_mode = non_empty(&node.target_mode_id);
    let target_track = non_empty(&node.target_track_id);
    let target_node = non_empty(&node.target_node_id);

    match node.action {
        GatewayAction::End => env.end(node),
        GatewayAction::SwitchMode => {
            if let Some(mode_rt) = env.switch(node, target_mode) {
                return ActiveRuntime::Mode(mode_rt);
            }
            rt.advance(track_id);
        }
        GatewayAction::JumpNode => jump_node(&mut rt, node, track_id, target_node),
        GatewayAction::JumpTrack => match (target_mode, target_track) {
            (Some(mode), _) => {
                debug!(target: "rotabot::gateway", node = %node.id, %mode, "cross-scope jump_track ignored");
                rt.advance(track_id);
            }
            (None, Some(t)) if t == track_id => jump_node(&mut rt, node, track_id, target_node),
            (None, Some(t)) => jump_track(&mut rt, node, track_id, t, target_node),
            (None, None) => rt.advance(track_id),
        },
        GatewayAction::Unknown => rt.advance(track_id),
    }
    env.poll_again(&mut rt, track_id);
    ActiveRuntime::Global(rt)
}

pub fn apply_gateway_mode(
    node: &GatewayNode,
    track_id: &str,
    mut rt: ModeRuntime,
    env: &mut GatewayEnv<'_>,
) -> ActiveRuntime {
    let target_mode = non_empty(&node.target_mode_id);
    let target_track = non_empty(&node.target_track_id);
    let target_node = non_empty(&node.target_node_id);

    match node.action {
        GatewayAction::End => env.end(node),
        GatewayAction::SwitchMode => {
            if let Some(mode_rt) = env.switch(node, target_mode) {
                return ActiveRuntime::Mode(mode_rt);
            }
            rt.advance(track_id);
        }
        GatewayAction::JumpNode => {
            jump_node(&mut rt, node, track_id, target_node);
            rt.maybe_backstep(track_id);
        }
        GatewayAction::JumpTrack => match (target_mode, target_track) {
            (Some(mode), _) if mode != rt.mode_id() => {
                // A foreign mode turns the jump into a mode switch.
                if let Some(mode_rt) = env.switch(node, Some(mode)) {
                    return ActiveRuntime::Mode(mode_rt);
                }
                rt.advance(track_id);
            }
            (_, Some(t)) if t == track_id => {
                jump_node(&mut rt, node, track_id, target_node);
                rt.maybe_backstep(track_id);
            }
            (_, Some(t)) => {
                jump_track(&mut rt, node, track_id, t, target_node);
                rt.maybe_backstep(t);
            }
            (_, None) => rt.advance(track_id),
        },
        GatewayAction::Unknown => rt.advance(track_id),
    }
    env.poll_again(&mut rt, track_id);
    ActiveRuntime::Mode(rt)
}

fn jump_node<S: Schedule>(rt: &mut S, node: &GatewayNode, track_id: &str, target_node: Option<&str>) {
    match target_node.and_then(|n| rt.node_index_of(track_id, n)) {
        Some(idx) => {
            debug!(target: "rotabot::gateway", node = %node.id, %track_id, idx, "jump_node");
            rt.jump_to(track_id, idx);
        }
        None => {
            warn!(target: "rotabot::gateway", node = %node.id, ?target_node, "jump_node target not found");
            rt.advance(track_id);
        }
    }
}

fn jump_track<S: Schedule>(
    rt: &mut S,
    node: &GatewayNode,
    track_id: &str,
    target_track: &str,
    target_node: Option<&str>,
) {
    if !rt.has_track(target_track) {
        warn!(target: "rotabot::gateway", node = %node.id, %target_track, "jump_track target not found");
        rt.advance(track_id);
        return;
    }
    let idx = target_node
        .and_then(|n| rt.node_index_of(target_track, n))
        .unwrap_or(0);
    debug!(target: "rotabot::gateway", node = %node.id, %target_track, idx, "jump_track");
    rt.jump_to(target_track, idx);
    // Step the triggering track too, or the gateway fires again on the next poll.
    rt.advance(track_id);
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, Node, SkillNode, Track};

    fn skill(id: &str, step: i32) -> Node {
        Node::Skill(SkillNode {
            id: id.into(),
            skill_id: "s".into(),
            step_index: step,
            ..Default::default()
        })
    }

    fn gateway(action: GatewayAction) -> GatewayNode {
        GatewayNode {
            id: "gw".into(),
            action,
            ..Default::default()
        }
    }

    fn mode(id: &str) -> Mode {
        Mode {
            id: id.into(),
            tracks: vec![
                Track {
                    id: "a".into(),
                    nodes: vec![skill(&format!("{id}-a0"), 0), skill(&format!("{id}-a1"), 1)],
                    ..Default::default()
                },
                Track {
                    id: "b".into(),
                    nodes: vec![skill(&format!("{id}-b0"), 0), skill(&format!("{id}-b1"), 1)],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    struct Harness {
        stop: StopSignal,
        reason: Option<String>,
        now: Instant,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                stop: StopSignal::new(),
                reason: None,
                now: Instant::now(),
            }
        }

        fn run(&mut self, node: &GatewayNode, track: &str, rt: ActiveRuntime) -> ActiveRuntime {
            let build = |id: &str| (id == "m2").then(|| ModeRuntime::new(&mode("m2"), self.now));
            let mut env = GatewayEnv {
                now: self.now,
                poll_delay: Duration::from_millis(10),
                stop: &self.stop,
                stop_reason: &mut self.reason,
                build_mode: &build,
            };
            apply(node, track, rt, &mut env)
        }
    }

    fn mode_rt(rt: &ActiveRuntime) -> &ModeRuntime {
        match rt {
            ActiveRuntime::Mode(m) => m,
            ActiveRuntime::Global(_) => panic!("expected mode runtime"),
        }
    }

    #[test]
    fn jump_track_moves_target_and_advances_self() {
        let mut h = Harness::new();
        let mut gw = gateway(GatewayAction::JumpTrack);
        gw.target_track_id = Some("b".into());
        gw.target_node_id = Some("m1-b1".into());

        let rt = ActiveRuntime::Mode(ModeRuntime::new(&mode("m1"), h.now));
        let rt = h.run(&gw, "a", rt);
        let m = mode_rt(&rt);
        assert_eq!(m.current_node_index("b"), Some(1));
        assert_eq!(m.current_node_index("a"), Some(1));
        assert!(h.reason.is_none());
    }

    #[test]
    fn jump_node_backsteps_the_barrier() {
        let mut h = Harness::new();
        let mut m = ModeRuntime::new(&mode("m1"), h.now);
        m.advance("a");
        m.advance("b");
        m.ensure_step_runnable();
        assert_eq!(m.current_step(), 1);

        let mut gw = gateway(GatewayAction::JumpNode);
        gw.target_node_id = Some("m1-a0".into());
        let rt = h.run(&gw, "a", ActiveRuntime::Mode(m));
        let m = mode_rt(&rt);
        assert_eq!(m.current_node_index("a"), Some(0));
        assert_eq!(m.current_step(), 0);
    }

    #[test]
    fn switch_mode_replaces_the_runtime() {
        let mut h = Harness::new();
        let mut gw = gateway(GatewayAction::SwitchMode);
        gw.target_mode_id = Some("m2".into());
        let mut m = ModeRuntime::new(&mode("m1"), h.now);
        m.advance("a");
        let rt = h.run(&gw, "a", ActiveRuntime::Mode(m));
        assert_eq!(rt.mode_id(), Some("m2"));
        assert_eq!(mode_rt(&rt).current_node_index("a"), Some(0));
    }

    #[test]
    fn failed_switch_only_advances() {
        let mut h = Harness::new();
        let mut gw = gateway(GatewayAction::SwitchMode);
        gw.target_mode_id = Some("ghost".into());
        let rt = h.run(&gw, "a", ActiveRuntime::Mode(ModeRuntime::new(&mode("m1"), h.now)));
        assert_eq!(rt.mode_id(), Some("m1"));
        assert_eq!(mode_rt(&rt).current_node_index("a"), Some(1));
    }

    #[test]
    fn foreign_jump_track_becomes_switch_mode() {
        let mut h = Harness::new();
        let mut gw = gateway(GatewayAction::JumpTrack);
        gw.target_mode_id = Some("m2".into());
        gw.target_track_id = Some("b".into());
        let rt = h.run(&gw, "a", ActiveRuntime::Mode(ModeRuntime::new(&mode("m1"), h.now)));
        assert_eq!(rt.mode_id(), Some("m2"));
    }

    #[test]
    fn global_scope_ignores_cross_mode_jump_track() {
        let mut h = Harness::new();
        let tracks = mode("m1").tracks;
        let mut gw = gateway(GatewayAction::JumpTrack);
        gw.target_mode_id = Some("m2".into());
        gw.target_track_id = Some("b".into());
        gw.target_node_id = Some("m1-b1".into());
        let rt = h.run(&gw, "a", ActiveRuntime::Global(GlobalRuntime::new(&tracks, h.now)));
        assert!(rt.mode_id().is_none());
        assert_eq!(rt.schedule().current_node_index("a"), Some(1));
        assert_eq!(rt.schedule().current_node_index("b"), Some(0));
    }

    #[test]
    fn global_jump_track_and_switch_mode() {
        let mut h = Harness::new();
        let tracks = mode("m1").tracks;
        let mut gw = gateway(GatewayAction::JumpTrack);
        gw.target_track_id = Some("b".into());
        gw.target_node_id = Some("m1-b1".into());
        let rt = h.run(&gw, "a", ActiveRuntime::Global(GlobalRuntime::new(&tracks, h.now)));
        assert_eq!(rt.schedule().current_node_index("b"), Some(1));
        assert_eq!(rt.schedule().current_node_index("a"), Some(1));

        let mut sw = gateway(GatewayAction::SwitchMode);
        sw.target_mode_id = Some("m2".into());
        let rt = h.run(&sw, "a", rt);
        assert_eq!(rt.mode_id(), Some("m2"));
    }

    #[test]
    fn end_raises_stop_and_keeps_runtime() {
        let mut h = Harness::new();
        let rt = h.run(
            &gateway(GatewayAction::End),
            "a",
            ActiveRuntime::Mode(ModeRuntime::new(&mode("m1"), h.now)),
        );
        assert!(h.stop.is_raised());
        assert_eq!(h.reason.as_deref(), Some("end:gw"));
        assert_eq!(mode_rt(&rt).current_node_index("a"), Some(0));
    }

    #[test]
    fn triggering_track_is_polled_after_the_gateway_delay() {
        let mut h = Harness::new();
        let mut gw = gateway(GatewayAction::JumpNode);
        gw.target_node_id = Some("m1-a1".into());
        let tracks = mode("m1").tracks;
        let rt = h.run(&gw, "a", ActiveRuntime::Global(GlobalRuntime::new(&tracks, h.now)));
        let ActiveRuntime::Global(g) = rt else { panic!("expected global") };
        assert_eq!(g.next_due(h.now), Some("b"));
        assert_eq!(g.next_due(h.now + Duration::from_millis(10)), Some("b"));
        assert_eq!(g.current_node_index("a"), Some(1));
    }

    #[test]
    fn pass_through_advances_and_delays() {
        let h = Harness::new();
        let mut stop_reason = None;
        let build = |_: &str| -> Option<ModeRuntime> { None };
        let env = GatewayEnv {
            now: h.now,
            poll_delay: Duration::from_millis(10),
            stop: &h.stop,
            stop_reason: &mut stop_reason,
            build_mode: &build,
        };
        let mut rt = ActiveRuntime::Global(GlobalRuntime::new(&mode("m1").tracks, h.now));
        pass_through("a", &mut rt, &env);
        assert_eq!(rt.schedule().current_node_index("a"), Some(1));
    }
}
