//! In-memory lineage index over generated artifact names: lookups by
//! workflow, task, date range, and description substring, without
//! re-parsing every filename on each query.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tradeforge_core::{TaskId, WorkflowId};

use crate::filename::{self, ParseNameError, ParsedName};

/// One registered artifact name plus the owning IDs it was generated from.
/// `parsed` only carries the short forms recovered from the filename; the
/// full IDs are kept alongside since the caller already has them at
/// registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedArtifact {
    pub filename: String,
    pub workflow_id: WorkflowId,
    pub task_id: TaskId,
    pub parsed: ParsedName,
}

/// Indexes artifact names as they're generated, keyed for the lineage
/// queries a workflow reviewer or debugger agent needs: "what did this
/// workflow produce", "what did this task produce", "what was produced in
/// this window", "what files mention X".
#[derive(Debug, Default)]
pub struct NamingRegistry {
    entries: Vec<NamedArtifact>,
    by_workflow: HashMap<WorkflowId, Vec<usize>>,
    by_task: HashMap<TaskId, Vec<usize>>,
}

impl NamingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a canonical filename for the given inputs and registers it.
    pub fn generate(
        &mut self,
        timestamp: DateTime<Utc>,
        workflow_id: WorkflowId,
        task_id: TaskId,
        description: &str,
        ext: &str,
    ) -> Result<String, ParseNameError> {
        let name = filename::generate(timestamp, workflow_id, task_id, description, ext);
        self.register(name.clone(), workflow_id, task_id)?;
        Ok(name)
    }

    /// Registers a filename that was already generated elsewhere (e.g.
    /// recovered from an artifact store listing), re-parsing it to validate
    /// shape and populate the index.
    ///
    /// # Errors
    ///
    /// Returns [`ParseNameError`] if `filename` is not in canonical form.
    pub fn register(
        &mut self,
        filename: String,
        workflow_id: WorkflowId,
        task_id: TaskId,
    ) -> Result<(), ParseNameError> {
        let parsed = filename::parse(&filename)?;
        let idx = self.entries.len();
        self.entries.push(NamedArtifact {
            filename,
            workflow_id,
            task_id,
            parsed,
        });
        self.by_workflow.entry(workflow_id).or_default().push(idx);
        self.by_task.entry(task_id).or_default().push(idx);
        Ok(())
    }

    #[must_use]
    pub fn by_workflow(&self, workflow_id: WorkflowId) -> Vec<&NamedArtifact> {
        self.by_workflow
            .get(&workflow_id)
            .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn by_task(&self, task_id: TaskId) -> Vec<&NamedArtifact> {
        self.by_task
            .get(&task_id)
            .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Artifacts whose generation timestamp falls within `[start, end]`
    /// inclusive.
    #[must_use]
    pub fn by_date_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&NamedArtifact> {
        self.entries
            .iter()
            .filter(|a| a.parsed.timestamp >= start && a.parsed.timestamp <= end)
            .collect()
    }

    /// Artifacts whose free-text description contains `needle` (case
    /// insensitive), matched against the truncated snake_case form stored in
    /// the filename.
    #[must_use]
    pub fn by_description_substring(&self, needle: &str) -> Vec<&NamedArtifact> {
        let needle = needle.to_lowercase();
        self.entries
            .iter()
            .filter(|a| a.parsed.description.contains(&needle))
            .collect()
    }

    /// The most recently generated artifact for `task_id`, by registration
    /// order (registration order follows generation order within a single
    /// process; callers rebuilding from storage should register in
    /// timestamp order to preserve this).
    #[must_use]
    pub fn latest_per_task(&self, task_id: TaskId) -> Option<&NamedArtifact> {
        self.by_task.get(&task_id)?.last().map(|&i| &self.entries[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, hour, 0, 0).unwrap()
    }

    #[test]
    fn generate_registers_and_is_queryable_by_workflow_and_task() {
        let mut registry = NamingRegistry::new();
        let workflow_id = WorkflowId::new();
        let task_id = TaskId::new();
        let name = registry
            .generate(ts(10), workflow_id, task_id, "rsi crossover strategy", "py")
            .unwrap();

        assert_eq!(registry.by_workflow(workflow_id).len(), 1);
        assert_eq!(registry.by_task(task_id).len(), 1);
        assert_eq!(registry.by_workflow(workflow_id)[0].filename, name);
    }

    #[test]
    fn by_date_range_is_inclusive_and_excludes_outside() {
        let mut registry = NamingRegistry::new();
        let workflow_id = WorkflowId::new();
        registry
            .generate(ts(9), workflow_id, TaskId::new(), "before", "py")
            .unwrap();
        registry
            .generate(ts(12), workflow_id, TaskId::new(), "inside", "py")
            .unwrap();
        registry
            .generate(ts(15), workflow_id, TaskId::new(), "after", "py")
            .unwrap();

        let found = registry.by_date_range(ts(10), ts(14));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].parsed.description, "inside");
    }

    #[test]
    fn by_description_substring_matches_case_insensitively() {
        let mut registry = NamingRegistry::new();
        registry
            .generate(ts(9), WorkflowId::new(), TaskId::new(), "RSI Strategy Backtest", "py")
            .unwrap();

        assert_eq!(registry.by_description_substring("strategy").len(), 1);
        assert_eq!(registry.by_description_substring("STRATEGY").len(), 1);
        assert!(registry.by_description_substring("nonexistent").is_empty());
    }

    #[test]
    fn latest_per_task_returns_most_recently_registered() {
        let mut registry = NamingRegistry::new();
        let task_id = TaskId::new();
        registry
            .generate(ts(9), WorkflowId::new(), task_id, "first draft", "py")
            .unwrap();
        let second = registry
            .generate(ts(10), WorkflowId::new(), task_id, "second draft", "py")
            .unwrap();

        assert_eq!(registry.latest_per_task(task_id).unwrap().filename, second);
    }

    #[test]
    fn unknown_workflow_and_task_return_empty() {
        let registry = NamingRegistry::new();
        assert!(registry.by_workflow(WorkflowId::new()).is_empty());
        assert!(registry.by_task(TaskId::new()).is_empty());
        assert!(registry.latest_per_task(TaskId::new()).is_none());
    }
}
