//! Per-session shared state: skill statistics and the cast lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

/// Counters for one skill. Snapshots are plain owned copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillStats {
    pub skill_id: String,
    pub skill_name: String,
    pub node_exec: u64,
    pub ready_false: u64,
    pub attempt: u64,
    pub retry: u64,
    pub cast_start: u64,
    pub success: u64,
    pub fail: u64,
    pub last_result: String,
    pub fail_by_reason: BTreeMap<String, u64>,
}

/// Statistics table written by the worker and read by the host.
#[derive(Debug, Default)]
pub struct StatsTable {
    inner: Mutex<BTreeMap<String, SkillStats>>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate the entry for `skill_id`, creating it on first use.
    pub fn update(&self, skill_id: &str, skill_name: &str, f: impl FnOnce(&mut SkillStats)) {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(skill_id.to_string()).or_insert_with(|| SkillStats {
            skill_id: skill_id.to_string(),
            skill_name: skill_name.to_string(),
            ..Default::default()
        });
        f(entry);
    }

    /// Owned copy of every entry, ordered by skill id.
    pub fn snapshot(&self) -> Vec<SkillStats> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values().cloned().collect()
    }

    pub fn get(&self, skill_id: &str) -> Option<SkillStats> {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(skill_id).cloned()
    }

}

/// Engine-wide guard allowing one skill cast in flight.
#[derive(Debug, Default)]
pub struct CastLock {
    held: AtomicBool,
}

impl CastLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire. The lock is released when the guard drops.
    pub fn try_lock(&self) -> Option<CastGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CastGuard { lock: self })
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[must_use = "the cast lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CastGuard<'a> {
    lock: &'a CastLock,
}

impl Drop for CastGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// State shared between the engine handle and its worker for one session.
#[derive(Debug, Default)]
pub struct EngineShared {
    pub stats: StatsTable,
    pub cast_lock: CastLock,
}

impl EngineShared {
    pub fn new() -> Self {
        Self::default()
    }
}
