//! The live task-dependency graph the dispatch loop schedules against.
//!
//! Generalizes the source's shrink-only `RemainingWorkGraph`
//! (`lib/workflow/src/remaining_work.rs`):
//! completed tasks are removed exactly as before, but a failed task can now
//! go one of two ways instead of always getting a permanent self-edge:
//!
//! - [`TaskGraph::mark_failed_retryable`] leaves the node and its incoming
//!   edges untouched, so it reappears in `ready_nodes()` on the next pass.
//! - [`TaskGraph::mark_failed_exhausted`] adds the source's self-edge,
//!   permanently blocking the node and anything reachable from it.
//!
//! [`TaskGraph::insert_task`] adds a node to the live graph at runtime (the
//! debugger branch todo), which the source's graph never needed since its
//! node set was fixed at construction time. [`TaskGraph::reinstate`] undoes
//! `mark_failed_exhausted` once a branch remediation succeeds; the source
//! has no equivalent because it never un-fails a node.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tradeforge_core::TaskId;

use crate::model::{Task, TodoList};

#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskId, ()>,
    index_of: HashMap<TaskId, NodeIndex>,
    executing: HashSet<TaskId>,
    failed_exhausted: HashSet<TaskId>,
}

impl TaskGraph {
    /// Builds the graph from a todo list's `depends_on` edges. Returns
    /// `None` if the dependency set contains a cycle.
    #[must_use]
    pub fn from_todo_list(todo_list: &TodoList) -> Option<Self> {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for task in &todo_list.items {
            let idx = graph.add_node(task.id);
            index_of.insert(task.id, idx);
        }

        for task in &todo_list.items {
            let target_idx = index_of[&task.id];
            for dep in &task.depends_on {
                let Some(&source_idx) = index_of.get(dep) else { continue };
                graph.add_edge(source_idx, target_idx, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return None;
        }

        Some(Self { graph, index_of, executing: HashSet::new(), failed_exhausted: HashSet::new() })
    }

    pub fn mark_executing(&mut self, task_id: TaskId) {
        if self.index_of.contains_key(&task_id) {
            self.executing.insert(task_id);
        }
    }

    /// Removes the task from the graph, unblocking anything that depended
    /// on it.
    pub fn mark_completed(&mut self, task_id: TaskId) {
        self.executing.remove(&task_id);
        self.failed_exhausted.remove(&task_id);
        if let Some(idx) = self.index_of.remove(&task_id) {
            self.graph.remove_node(idx);
            self.rebuild_index();
        }
    }

    /// Leaves the node in the graph with its existing edges; since a task
    /// only dispatches once its predecessors are removed, this makes it
    /// immediately ready again for re-dispatch.
    pub fn mark_failed_retryable(&mut self, task_id: TaskId) {
        self.executing.remove(&task_id);
    }

    /// Adds a self-edge so the node never has zero incoming edges again,
    /// and records it so `blocked_nodes`/`has_failures` see it.
    pub fn mark_failed_exhausted(&mut self, task_id: TaskId) {
        self.executing.remove(&task_id);
        if let Some(&idx) = self.index_of.get(&task_id) {
            self.graph.add_edge(idx, idx, ());
            self.failed_exhausted.insert(task_id);
        }
    }

    /// Undoes `mark_failed_exhausted`: removes the self-edge and clears the
    /// failed marker, so the task can re-enter `ready_nodes()`.
    pub fn reinstate(&mut self, task_id: TaskId) {
        self.failed_exhausted.remove(&task_id);
        if let Some(&idx) = self.index_of.get(&task_id) {
            while let Some(edge) = self.graph.find_edge(idx, idx) {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Adds a new node to the live graph (the debugger branch todo), wired
    /// with incoming edges from each dependency still present in the graph.
    /// Dependencies already removed (completed) are skipped rather than
    /// treated as an error, since their work is already satisfied.
    pub fn insert_task(&mut self, task_id: TaskId, depends_on: &[TaskId]) {
        let idx = self.graph.add_node(task_id);
        self.index_of.insert(task_id, idx);
        for dep in depends_on {
            if let Some(&source_idx) = self.index_of.get(dep) {
                self.graph.add_edge(source_idx, idx, ());
            }
        }
    }

    #[must_use]
    pub fn ready_nodes(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| {
                let task_id = *self.graph.node_weight(idx)?;
                (!self.executing.contains(&task_id)).then_some(task_id)
            })
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.executing.is_empty() && self.ready_nodes().is_empty()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed_exhausted.is_empty()
    }

    #[must_use]
    pub fn failed_nodes(&self) -> &HashSet<TaskId> {
        &self.failed_exhausted
    }

    #[must_use]
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.index_of.contains_key(&task_id)
    }

    /// Nodes reachable from a permanently failed node, excluding the failed
    /// nodes themselves and self-edges.
    #[must_use]
    pub fn blocked_nodes(&self) -> Vec<TaskId> {
        let mut blocked = HashSet::new();
        for &failed_id in &self.failed_exhausted {
            let Some(&start_idx) = self.index_of.get(&failed_id) else { continue };
            let mut stack = vec![start_idx];
            while let Some(idx) = stack.pop() {
                for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                    let target = edge.target();
                    if target == idx {
                        continue;
                    }
                    if let Some(&target_id) = self.graph.node_weight(target)
                        && !self.failed_exhausted.contains(&target_id)
                        && blocked.insert(target_id)
                    {
                        stack.push(target);
                    }
                }
            }
        }
        blocked.into_iter().collect()
    }

    fn rebuild_index(&mut self) {
        self.index_of.clear();
        for idx in self.graph.node_indices() {
            if let Some(&task_id) = self.graph.node_weight(idx) {
                self.index_of.insert(task_id, idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcceptanceCriteria, Task};
    use std::collections::HashSet;
    use tradeforge_bus::AgentRole;

    fn task(role: AgentRole, depends_on: HashSet<TaskId>) -> Task {
        Task::new("t", "d", role, 0, depends_on, AcceptanceCriteria { tests: vec![], schema: None })
    }

    #[test]
    fn a_task_with_no_dependencies_is_ready() {
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![task(AgentRole::Planner, HashSet::new())]);
        let graph = TaskGraph::from_todo_list(&todo).unwrap();
        assert_eq!(graph.ready_nodes().len(), 1);
    }

    #[test]
    fn completing_a_task_unblocks_its_dependent() {
        let a = task(AgentRole::Planner, HashSet::new());
        let b = task(AgentRole::Architect, HashSet::from([a.id]));
        let b_id = b.id;
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![a.clone(), b]);
        let mut graph = TaskGraph::from_todo_list(&todo).unwrap();
        assert_eq!(graph.ready_nodes(), vec![a.id]);
        graph.mark_completed(a.id);
        assert_eq!(graph.ready_nodes(), vec![b_id]);
        assert!(!graph.is_complete());
        graph.mark_completed(b_id);
        assert!(graph.is_complete());
    }

    #[test]
    fn retryable_failure_stays_ready() {
        let a = task(AgentRole::Coder, HashSet::new());
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![a.clone()]);
        let mut graph = TaskGraph::from_todo_list(&todo).unwrap();
        graph.mark_executing(a.id);
        graph.mark_failed_retryable(a.id);
        assert_eq!(graph.ready_nodes(), vec![a.id]);
        assert!(!graph.has_failures());
    }

    #[test]
    fn exhausted_failure_blocks_downstream_until_reinstated() {
        let a = task(AgentRole::Coder, HashSet::new());
        let b = task(AgentRole::Tester, HashSet::from([a.id]));
        let a_id = a.id;
        let b_id = b.id;
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![a, b]);
        let mut graph = TaskGraph::from_todo_list(&todo).unwrap();
        graph.mark_executing(a_id);
        graph.mark_failed_exhausted(a_id);
        assert!(graph.ready_nodes().is_empty());
        assert_eq!(graph.blocked_nodes(), vec![b_id]);
        assert!(graph.has_failures());

        graph.reinstate(a_id);
        assert_eq!(graph.ready_nodes(), vec![a_id]);
        assert!(!graph.has_failures());
    }

    #[test]
    fn inserted_branch_task_with_no_deps_is_immediately_ready() {
        let a = task(AgentRole::Coder, HashSet::new());
        let a_id = a.id;
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![a]);
        let mut graph = TaskGraph::from_todo_list(&todo).unwrap();
        graph.mark_executing(a_id);
        graph.mark_failed_exhausted(a_id);

        let branch_id = TaskId::new();
        graph.insert_task(branch_id, &[]);
        assert_eq!(graph.ready_nodes(), vec![branch_id]);
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let mut a = task(AgentRole::Coder, HashSet::new());
        let mut b = task(AgentRole::Tester, HashSet::new());
        a.depends_on.insert(b.id);
        b.depends_on.insert(a.id);
        let todo = TodoList::new(tradeforge_core::WorkflowId::new(), "wf", vec![a, b]);
        assert!(TaskGraph::from_todo_list(&todo).is_none());
    }
}
