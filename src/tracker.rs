//! Dirty tracking and save planning for incremental saves.
//!
//! The tracker records which systems changed since the last full save and
//! turns that into a plan: full save, delta of dirty systems only, or skip.
//! Content hashes (XxHash64, cheap and non-cryptographic) let systems report
//! state without spuriously marking themselves dirty.

use std::collections::HashMap;
use std::hash::Hasher;
use std::time::{Duration, Instant};

use twox_hash::XxHash64;

/// Autosave trigger policy.
#[derive(Debug, Clone)]
pub struct TrackerPolicy {
    /// Elapsed time since the last save that triggers a save on its own.
    pub autosave_interval: Duration,
    /// Total dirty-mark count that triggers a save on its own.
    pub dirty_threshold: u64,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(300),
            dirty_threshold: 50,
        }
    }
}

/// Per-system change-tracking state.
#[derive(Debug, Clone)]
pub struct SystemState {
    pub dirty: bool,
    pub change_count: u64,
    pub content_hash: Option<u64>,
    pub last_modified: Option<Instant>,
    pub last_saved: Option<Instant>,
}

impl SystemState {
    fn new() -> Self {
        Self {
            dirty: true, // never saved, so the first save must include it
            change_count: 0,
            content_hash: None,
            last_modified: None,
            last_saved: None,
        }
    }
}

/// What the next save should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePlan {
    /// Serialize every registered system.
    Full,
    /// Serialize only the named systems, against the last full baseline.
    Delta { systems: Vec<String> },
    /// Nothing changed; no write needed.
    Skip,
}

/// Tracks per-system dirtiness and plans full vs. delta saves.
#[derive(Debug)]
pub struct IncrementalTracker {
    systems: HashMap<String, SystemState>,
    policy: TrackerPolicy,
    /// Bumped on every completed full save.
    generation: u64,
    last_save: Option<Instant>,
    pending_changes: u64,
}

impl IncrementalTracker {
    pub fn new(policy: TrackerPolicy) -> Self {
        Self {
            systems: HashMap::new(),
            policy,
            generation: 0,
            last_save: None,
            pending_changes: 0,
        }
    }

    pub fn register(&mut self, system: impl Into<String>) {
        self.systems.entry(system.into()).or_insert_with(SystemState::new);
    }

    pub fn mark_dirty(&mut self, system: &str) {
        if let Some(state) = self.systems.get_mut(system) {
            state.dirty = true;
            state.change_count += 1;
            state.last_modified = Some(Instant::now());
            self.pending_changes += 1;
        } else {
            tracing::warn!(system, "mark_dirty for unregistered system ignored");
        }
    }

    pub fn mark_clean(&mut self, system: &str) {
        if let Some(state) = self.systems.get_mut(system) {
            state.dirty = false;
            state.last_saved = Some(Instant::now());
            // Changes persisted by a delta no longer count toward the
            // dirty-count autosave trigger.
            self.pending_changes = self.pending_changes.saturating_sub(state.change_count);
            state.change_count = 0;
        }
    }

    /// Clears all dirty flags after a completed full save and bumps the
    /// generation.
    pub fn mark_all_clean(&mut self) {
        let now = Instant::now();
        for state in self.systems.values_mut() {
            state.dirty = false;
            state.change_count = 0;
            state.last_saved = Some(now);
        }
        self.generation += 1;
        self.last_save = Some(now);
        self.pending_changes = 0;
    }

    /// Hashes `content` and marks the system dirty only when the hash moved.
    ///
    /// Returns whether the content actually changed.
    pub fn update_content_hash(&mut self, system: &str, content: &[u8]) -> bool {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(content);
        let hash = hasher.finish();

        let changed = match self.systems.get(system) {
            Some(state) => state.content_hash != Some(hash),
            None => {
                tracing::warn!(system, "content hash for unregistered system ignored");
                return false;
            }
        };
        if changed {
            self.mark_dirty(system);
        }
        if let Some(state) = self.systems.get_mut(system) {
            state.content_hash = Some(hash);
        }
        changed
    }

    pub fn dirty_systems(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .systems
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn is_dirty(&self, system: &str) -> bool {
        self.systems.get(system).is_some_and(|s| s.dirty)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether policy says a save is due, and why.
    pub fn should_save(&self) -> Option<&'static str> {
        if self.dirty_systems().is_empty() {
            return None;
        }
        if self.pending_changes >= self.policy.dirty_threshold {
            return Some("dirty-count threshold reached");
        }
        match self.last_save {
            None => Some("no save yet this session"),
            Some(at) if at.elapsed() >= self.policy.autosave_interval => {
                Some("autosave interval elapsed")
            }
            Some(_) => None,
        }
    }

    /// Plans the next save.
    ///
    /// A delta needs a full baseline (generation > 0) and a strict subset of
    /// systems dirty; otherwise the plan is a full save. No dirty systems
    /// means skip (unless forced).
    pub fn plan_save(&self, force_full: bool) -> SavePlan {
        if force_full {
            return SavePlan::Full;
        }
        let dirty = self.dirty_systems();
        if dirty.is_empty() {
            return SavePlan::Skip;
        }
        if self.generation == 0 || dirty.len() == self.systems.len() {
            return SavePlan::Full;
        }
        SavePlan::Delta { systems: dirty }
    }

    pub fn state(&self, system: &str) -> Option<&SystemState> {
        self.systems.get(system)
    }
}

impl Default for IncrementalTracker {
    fn default() -> Self {
        Self::new(TrackerPolicy::default())
    }
}
