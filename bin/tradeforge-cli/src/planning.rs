//! Synchronous plan bootstrap invoked at `submit` time (§4.2): calls the
//! planner role adapter once, parses its structured plan into a
//! dependency-chained `TodoList`, and falls back to a fixed
//! architect -> coder -> tester template DAG if planning fails or returns
//! an unusable shape.

use std::collections::HashSet;
use std::sync::Arc;

use tradeforge_agents::{AgentContext, AgentHandler, AgentOutput, Planner};
use tradeforge_bus::AgentRole;
use tradeforge_core::{TaskId, WorkflowId};
use tradeforge_llm::{RateStore, Router};
use tradeforge_orchestrator::{AcceptanceCriteria, Task, TodoList};

fn no_criteria() -> AcceptanceCriteria {
    AcceptanceCriteria { tests: vec![], schema: None }
}

/// The fixed architect -> coder -> tester pipeline used when planning
/// fails or returns no usable items. Each stage depends on every task
/// produced so far (not just its immediate predecessor), so a tester task
/// still reaches the architect's contract via `collect_dependency_artifacts`
/// even though the pipeline is already fully serialized by the coder edge.
fn fallback_todo_list(workflow_id: WorkflowId, request: &str) -> TodoList {
    let architect = Task::new("design strategy interfaces and fixtures", request, AgentRole::Architect, 0, HashSet::new(), no_criteria());
    let coder = Task::new("implement the strategy module", request, AgentRole::Coder, 0, HashSet::from([architect.id]), no_criteria());
    let tester = Task::new("run acceptance tests in sandbox", request, AgentRole::Tester, 0, HashSet::from([architect.id, coder.id]), no_criteria());
    TodoList::new(workflow_id, request, vec![architect, coder, tester])
}

/// Produces the initial `TodoList` for a submitted request: invokes the
/// planner synchronously and chains its items in dependency order, each
/// depending on every task already produced.
pub async fn plan<S: RateStore + Send + Sync>(router: Arc<Router<S>>, workflow_id: WorkflowId, request: &str) -> TodoList {
    let planner = Planner::new(router);
    let root_task = Task::new("plan strategy", request, AgentRole::Planner, 0, HashSet::new(), no_criteria());
    let ctx = AgentContext { workflow_id, task: root_task, dependency_artifacts: vec![] };

    let Ok(AgentOutput::Artifact { bytes, .. }) = planner.handle(&ctx).await else {
        return fallback_todo_list(workflow_id, request);
    };
    let Ok(plan): Result<serde_json::Value, _> = serde_json::from_slice(&bytes) else {
        return fallback_todo_list(workflow_id, request);
    };
    let Some(items) = plan["items"].as_array() else {
        return fallback_todo_list(workflow_id, request);
    };

    let mut tasks = Vec::with_capacity(items.len());
    let mut produced: HashSet<TaskId> = HashSet::new();
    for item in items {
        let Some(title) = item["title"].as_str() else { continue };
        let Ok(agent_role) = serde_json::from_value::<AgentRole>(item["agent_role"].clone()) else { continue };
        let task = Task::new(title, request, agent_role, 0, produced.clone(), no_criteria());
        produced.insert(task.id);
        tasks.push(task);
    }

    if tasks.is_empty() {
        return fallback_todo_list(workflow_id, request);
    }
    TodoList::new(workflow_id, request, tasks)
}
