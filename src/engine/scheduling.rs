//! Scheduling state derived from a preset snapshot.
//!
//! [`GlobalRuntime`] runs every track as an independent ring.
//! [`ModeRuntime`] runs the tracks of one mode behind a shared step barrier.

use std::time::Instant;

use tracing::trace;

use crate::config::{Mode, Node, Track};

/// Cursor operations shared by both runtimes.
pub trait Schedule {
    fn has_track(&self, track_id: &str) -> bool;

    fn current_node_index(&self, track_id: &str) -> Option<usize>;

    /// Index of `node_id` on `track_id` in scheduling order.
    fn node_index_of(&self, track_id: &str, node_id: &str) -> Option<usize>;

    /// Move past the current node.
    fn advance(&mut self, track_id: &str);

    /// Place the cursor at `index`; out-of-range indices go to 0.
    fn jump_to(&mut self, track_id: &str, index: usize);

    fn set_next_at(&mut self, track_id: &str, at: Instant);
}

#[derive(Debug, Clone)]
struct RingTrack {
    track: Track,
    node_index: usize,
    next_at: Instant,
}

#[derive(Debug, Clone)]
pub struct GlobalRuntime {
    tracks: Vec<RingTrack>,
}

impl GlobalRuntime {
    pub fn new(tracks: &[Track], now: Instant) -> Self {
        Self {
            tracks: tracks
                .iter()
                .map(|t| RingTrack {
                    track: t.clone(),
                    node_index: 0,
                    next_at: now,
                })
                .collect(),
        }
    }

    fn find(&self, track_id: &str) -> Option<&RingTrack> {
        self.tracks.iter().find(|t| t.track.id == track_id)
    }

    fn find_mut(&mut self, track_id: &str) -> Option<&mut RingTrack> {
        self.tracks.iter_mut().find(|t| t.track.id == track_id)
    }

    pub fn current_node(&self, track_id: &str) -> Option<&Node> {
        let t = self.find(track_id)?;
        t.track.nodes.get(t.node_index)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|t| t.track.id.as_str())
    }

    /// The non-empty track that has been due the longest at `now`.
    pub fn next_due(&self, now: Instant) -> Option<&str> {
        self.tracks
            .iter()
            .filter(|t| !t.track.nodes.is_empty() && t.next_at <= now)
            .min_by_key(|t| t.next_at)
            .map(|t| t.track.id.as_str())
    }

    /// Earliest time any non-empty track becomes due.
    pub fn earliest_next_at(&self) -> Option<Instant> {
        self.tracks
            .iter()
            .filter(|t| !t.track.nodes.is_empty())
            .map(|t| t.next_at)
            .min()
    }
}

impl Schedule for GlobalRuntime {
    fn has_track(&self, track_id: &str) -> bool {
        self.find(track_id).is_some()
    }

    fn current_node_index(&self, track_id: &str) -> Option<usize> {
        self.find(track_id).map(|t| t.node_index)
    }

    fn node_index_of(&self, track_id: &str, node_id: &str) -> Option<usize> {
        self.find(track_id)?.track.node_index(node_id)
    }

    fn advance(&mut self, track_id: &str) {
        if let Some(t) = self.find_mut(track_id) {
            let len = t.track.nodes.len();
            t.node_index = if len == 0 { 0 } else { (t.node_index + 1) % len };
        }
    }

    fn jump_to(&mut self, track_id: &str, index: usize) {
        if let Some(t) = self.find_mut(track_id) {
            t.node_index = if index < t.track.nodes.len() { index } else { 0 };
        }
    }

    fn set_next_at(&mut self, track_id: &str, at: Instant) {
        if let Some(t) = self.find_mut(track_id) {
            t.next_at = at;
        }
    }
}

#[derive(Debug, Clone)]
struct StepTrack {
    track_id: String,
    /// Sorted by `(step_index, order_in_step, original index)`.
    nodes: Vec<Node>,
    node_index: usize,
    next_at: Instant,
}

impl StepTrack {
    fn is_done(&self) -> bool {
        self.node_index >= self.nodes.len()
    }

    fn current(&self) -> Option<&Node> {
        self.nodes.get(self.node_index)
    }
}

#[derive(Debug, Clone)]
pub struct ModeRuntime {
    mode_id: String,
    tracks: Vec<StepTrack>,
    current_step: i32,
}

impl ModeRuntime {
    pub fn new(mode: &Mode, now: Instant) -> Self {
        let tracks = mode
            .tracks
            .iter()
            .map(|t| {
                let mut nodes = t.nodes.clone();
                // Stable sort keeps the original order as the final tie-break.
                nodes.sort_by_key(|n| (n.step_index(), n.order_in_step()));
                StepTrack {
                    track_id: t.id.clone(),
                    nodes,
                    node_index: 0,
                    next_at: now,
                }
            })
            .collect();
        let mut rt = Self {
            mode_id: mode.id.clone(),
            tracks,
            current_step: 0,
        };
        rt.reset_cycle();
        rt
    }

    pub fn mode_id(&self) -> &str {
        &self.mode_id
    }

    pub fn current_step(&self) -> i32 {
        self.current_step
    }

    fn find(&self, track_id: &str) -> Option<&StepTrack> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    fn find_mut(&mut self, track_id: &str) -> Option<&mut StepTrack> {
        self.tracks.iter_mut().find(|t| t.track_id == track_id)
    }

    pub fn current_node(&self, track_id: &str) -> Option<&Node> {
        self.find(track_id)?.current()
    }

    pub fn is_done(&self, track_id: &str) -> bool {
        self.find(track_id).is_none_or(StepTrack::is_done)
    }

    /// Whether the track's current node sits on the current step.
    pub fn is_runnable(&self, track_id: &str) -> bool {
        self.find(track_id)
            .and_then(StepTrack::current)
            .is_some_and(|n| n.step_index() == self.current_step)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.tracks.iter().map(|t| t.track_id.as_str())
    }

    /// The runnable track that has been due the longest at `now`.
    pub fn next_due(&self, now: Instant) -> Option<&str> {
        self.tracks
            .iter()
            .filter(|t| t.next_at <= now && self.is_runnable(&t.track_id))
            .min_by_key(|t| t.next_at)
            .map(|t| t.track_id.as_str())
    }

    /// Earliest time a runnable track becomes due.
    pub fn earliest_next_at(&self) -> Option<Instant> {
        self.tracks
            .iter()
            .filter(|t| self.is_runnable(&t.track_id))
            .map(|t| t.next_at)
            .min()
    }

    /// Move the barrier forward when no track can run at the current step.
    pub fn ensure_step_runnable(&mut self) {
        if self.tracks.iter().any(|t| self.is_runnable(&t.track_id)) {
            return;
        }
        let next = self
            .tracks
            .iter()
            .filter_map(|t| t.current().map(Node::step_index))
            .min();
        match next {
            Some(step) => {
                trace!(target: "rotabot::schedule", mode = %self.mode_id, from = self.current_step, to = step, "step advance");
                self.current_step = step;
            }
            None => self.reset_cycle(),
        }
    }

    /// Rewind every cursor and put the barrier at the lowest first step.
    pub fn reset_cycle(&mut self) {
        for t in &mut self.tracks {
            t.node_index = 0;
        }
        if let Some(step) = self
            .tracks
            .iter()
            .filter_map(|t| t.current().map(Node::step_index))
            .min()
        {
            self.current_step = step;
        }
        trace!(target: "rotabot::schedule", mode = %self.mode_id, step = self.current_step, "cycle reset");
    }

    /// After an external jump, pull the barrier back so the jumped track can run.
    pub fn maybe_backstep(&mut self, track_id: &str) {
        let Some(step) = self.current_node(track_id).map(Node::step_index) else {
            return;
        };
        if step < self.current_step {
            trace!(target: "rotabot::schedule", mode = %self.mode_id, %track_id, from = self.current_step, to = step, "backstep");
            self.current_step = step;
        }
    }

    /// Start the run at a specific node: cursor there, barrier at its step.
    pub fn start_at(&mut self, track_id: &str, index: usize) {
        self.jump_to(track_id, index);
        if let Some(step) = self.current_node(track_id).map(Node::step_index) {
            self.current_step = step;
        }
    }
}

impl Schedule for ModeRuntime {
    fn has_track(&self, track_id: &str) -> bool {
        self.find(track_id).is_some()
    }

    fn current_node_index(&self, track_id: &str) -> Option<usize> {
        self.find(track_id).map(|t| t.node_index)
    }

    fn node_index_of(&self, track_id: &str, node_id: &str) -> Option<usize> {
        self.find(track_id)?.nodes.iter().position(|n| n.id() == node_id)
    }

    fn advance(&mut self, track_id: &str) {
        if let Some(t) = self.find_mut(track_id) {
            if !t.is_done() {
                t.node_index += 1;
            }
        }
    }

    fn jump_to(&mut self, track_id: &str, index: usize) {
        if let Some(t) = self.find_mut(track_id) {
            t.node_index = if index < t.nodes.len() { index } else { 0 };
        }
    }

    fn set_next_at(&mut self, track_id: &str, at: Instant) {
        if let Some(t) = self.find_mut(track_id) {
            t.next_at = at;
        }
    }
}
