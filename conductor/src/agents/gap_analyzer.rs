//! Goal gap analysis: new tasks when the plan runs dry but core goals are unmet.

use tracing::{info, instrument, warn};

use crate::core::graph::TaskGraph;
use crate::core::proposals::{ProposalDefaults, TaskDraft, decode_proposals};
use crate::core::types::{Goal, Task, TaskStatus};
use crate::io::prompt::gap_analyzer_instruction;

use super::AgentHandle;

pub const GAP_ANALYZER_MAX_TURNS: u32 = 20;
pub const MAX_GAP_TASKS: usize = 5;
const RECENT_COMPLETED: usize = 15;
const RECENT_FAILED: usize = 5;

pub struct GapAnalyzer<'a> {
    handle: AgentHandle<'a>,
    model: String,
}

impl<'a> GapAnalyzer<'a> {
    pub fn new(handle: AgentHandle<'a>, model: impl Into<String>) -> Self {
        Self {
            handle,
            model: model.into(),
        }
    }

    #[instrument(skip_all, fields(unmet = unmet.len(), step = step))]
    pub fn analyze(&self, unmet: &[&Goal], graph: &TaskGraph, step: u64) -> Vec<TaskDraft> {
        if unmet.is_empty() {
            return Vec::new();
        }
        let completed = recent(graph, TaskStatus::Complete, RECENT_COMPLETED);
        let failed = recent(graph, TaskStatus::Failed, RECENT_FAILED);
        let instruction = match gap_analyzer_instruction(unmet, &completed, &failed, MAX_GAP_TASKS)
        {
            Ok(instruction) => instruction,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render gap analyzer prompt");
                return Vec::new();
            }
        };
        let request = self.handle.request(
            format!("gap-analysis-step-{step}"),
            instruction,
            String::new(),
            GAP_ANALYZER_MAX_TURNS,
            &self.model,
        );
        let result = self.handle.invoke("gap_analyzer", step, &request);
        if !result.is_success() {
            warn!(error = %result.error_summary(), "gap analyzer agent failed");
            return Vec::new();
        }
        let goal_ids = unmet.iter().map(|goal| goal.id.clone()).collect();
        let drafts = decode_proposals(
            &result.output,
            &ProposalDefaults::goal_gap(goal_ids),
            MAX_GAP_TASKS,
        );
        info!(proposed = drafts.len(), "gap analysis proposals decoded");
        drafts
    }
}

/// The last `limit` tasks with `status`, in graph order.
fn recent(graph: &TaskGraph, status: TaskStatus, limit: usize) -> Vec<&Task> {
    let matching: Vec<&Task> = graph
        .tasks()
        .iter()
        .filter(|task| task.status == status)
        .collect();
    let skip = matching.len().saturating_sub(limit);
    matching.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::{AgentResult, GoalTier};
    use crate::io::events::EventLog;
    use crate::test_support::{ScriptedAgent, task};

    #[test]
    fn proposals_default_to_unmet_goals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let events = EventLog::open(temp.path().join("events.jsonl")).expect("events");
        let agent = ScriptedAgent::new().push(
            "gap",
            AgentResult::success("```json\n[{\"title\": \"Write report\"}]\n```"),
        );
        let handle = AgentHandle {
            agent: &agent,
            events: &events,
            trace_id: "orch-1",
            root: temp.path(),
            timeout: Duration::from_secs(5),
        };
        let goal = Goal::new("goal-1", "Ship a report", GoalTier::Core);
        let mut done = task("task-1");
        done.status = TaskStatus::Complete;
        let graph = TaskGraph::from_tasks(vec![done]).expect("graph");

        let drafts = GapAnalyzer::new(handle, "sonnet").analyze(&[&goal], &graph, 4);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].related_goals, vec!["goal-1".to_string()]);
        assert_eq!(drafts[0].priority, 8);

        let requests = agent.requests();
        assert_eq!(requests[0].label, "gap-analysis-step-4");
        assert!(requests[0].instruction.contains("Ship a report"));
        assert!(requests[0].instruction.contains("task-1: task-1 title"));
    }

    #[test]
    fn recent_keeps_the_tail() {
        let tasks = (0..4)
            .map(|idx| {
                let mut t = task(&format!("task-{idx}"));
                t.status = TaskStatus::Failed;
                t
            })
            .collect();
        let graph = TaskGraph::from_tasks(tasks).expect("graph");
        let ids: Vec<&str> = recent(&graph, TaskStatus::Failed, 2)
            .iter()
            .map(|task| task.id.as_str())
            .collect();
        assert_eq!(ids, vec!["task-2", "task-3"]);
    }
}
