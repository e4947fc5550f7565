//! Schema migration for system payloads.
//!
//! Each system registers forward-only steps between adjacent (or skipping)
//! schema versions. Steps form a directed graph per system; path finding is
//! breadth-first, so the shortest hop count wins when multiple routes exist.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SaveError};

/// Payload transform applied by one migration step.
pub type TransformFn = Arc<dyn Fn(Vec<u8>) -> Result<Vec<u8>> + Send + Sync>;

/// One forward migration between two schema versions of a system payload.
#[derive(Clone)]
pub struct MigrationStep {
    pub from_version: u32,
    pub to_version: u32,
    pub description: String,
    pub transform: TransformFn,
}

impl MigrationStep {
    pub fn new(
        from_version: u32,
        to_version: u32,
        description: impl Into<String>,
        transform: impl Fn(Vec<u8>) -> Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from_version,
            to_version,
            description: description.into(),
            transform: Arc::new(transform),
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("description", &self.description)
            .finish()
    }
}

/// Registry of migration steps, keyed by system name.
#[derive(Default)]
pub struct MigrationRegistry {
    steps: HashMap<String, Vec<MigrationStep>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step for `system`. Backward steps are rejected.
    pub fn register(&mut self, system: impl Into<String>, step: MigrationStep) -> Result<()> {
        if step.to_version <= step.from_version {
            return Err(SaveError::config(format!(
                "migration step must move forward, got {} -> {}",
                step.from_version, step.to_version
            )));
        }
        self.steps.entry(system.into()).or_default().push(step);
        Ok(())
    }

    /// Registers all of a system's steps at once.
    pub fn register_all(&mut self, system: &str, steps: Vec<MigrationStep>) -> Result<()> {
        for step in steps {
            self.register(system, step)?;
        }
        Ok(())
    }

    /// Finds the shortest forward chain of steps from `from` to `to`.
    ///
    /// Returns an empty path when `from == to`. Absence of a route is
    /// `NoMigrationPath`.
    pub fn find_path(&self, system: &str, from: u32, to: u32) -> Result<Vec<&MigrationStep>> {
        if from == to {
            return Ok(Vec::new());
        }
        if from > to {
            return Err(SaveError::NoMigrationPath {
                system: system.to_string(),
                from,
                to,
            });
        }

        let steps = self.steps.get(system).map(Vec::as_slice).unwrap_or(&[]);

        // BFS over versions; predecessor map reconstructs the step chain.
        let mut visited: HashSet<u32> = HashSet::from([from]);
        let mut queue: VecDeque<u32> = VecDeque::from([from]);
        let mut came_from: HashMap<u32, &MigrationStep> = HashMap::new();

        while let Some(version) = queue.pop_front() {
            if version == to {
                let mut path = Vec::new();
                let mut at = to;
                while at != from {
                    let step = came_from[&at];
                    path.push(step);
                    at = step.from_version;
                }
                path.reverse();
                return Ok(path);
            }
            for step in steps.iter().filter(|s| s.from_version == version) {
                if step.to_version <= to && visited.insert(step.to_version) {
                    came_from.insert(step.to_version, step);
                    queue.push_back(step.to_version);
                }
            }
        }

        Err(SaveError::NoMigrationPath {
            system: system.to_string(),
            from,
            to,
        })
    }

    /// Migrates `payload` from `from` to `to`, running each step in order.
    ///
    /// Returns the migrated payload and the number of steps applied.
    pub fn apply(&self, system: &str, payload: Vec<u8>, from: u32, to: u32) -> Result<(Vec<u8>, usize)> {
        let path = self.find_path(system, from, to)?;
        let step_count = path.len();
        let mut current = payload;
        for step in path {
            tracing::debug!(
                system,
                from = step.from_version,
                to = step.to_version,
                "applying migration step: {}",
                step.description
            );
            current = (step.transform)(current)?;
        }
        Ok((current, step_count))
    }

    /// Human-readable description of the path from `from` to `to`.
    pub fn describe_path(&self, system: &str, from: u32, to: u32) -> Result<Vec<String>> {
        Ok(self
            .find_path(system, from, to)?
            .iter()
            .map(|s| format!("v{} -> v{}: {}", s.from_version, s.to_version, s.description))
            .collect())
    }

    /// Registered step count for a system, for diagnostics.
    pub fn step_count(&self, system: &str) -> usize {
        self.steps.get(system).map_or(0, Vec::len)
    }
}

impl fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (system, steps) in &self.steps {
            map.entry(&system, &steps.len());
        }
        map.finish()
    }
}
