//! Replanner: remediation proposals for a permanently failed task.

use tracing::{info, instrument, warn};

use crate::core::contracts::ReviewFeedback;
use crate::core::proposals::{ProposalDefaults, TaskDraft, decode_proposals};
use crate::core::types::{CheckResult, Task};
use crate::io::prompt::replanner_prompt;

use super::AgentHandle;

pub const REPLANNER_MAX_TURNS: u32 = 12;
pub const MAX_REMEDIATION_TASKS: usize = 3;

pub struct Replanner<'a> {
    handle: AgentHandle<'a>,
    model: String,
}

impl<'a> Replanner<'a> {
    pub fn new(handle: AgentHandle<'a>, model: impl Into<String>) -> Self {
        Self {
            handle,
            model: model.into(),
        }
    }

    /// Ask for up to [`MAX_REMEDIATION_TASKS`] drafts. Agent failures and
    /// unparseable output yield no drafts.
    #[instrument(skip_all, fields(task_id = %failed.id, step = step))]
    pub fn propose(
        &self,
        failed: &Task,
        review: Option<&ReviewFeedback>,
        tests: &[CheckResult],
        step: u64,
    ) -> Vec<TaskDraft> {
        let (instruction, context) =
            match replanner_prompt(failed, review, tests, MAX_REMEDIATION_TASKS) {
                Ok(parts) => parts,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "failed to render replanner prompt");
                    return Vec::new();
                }
            };
        let request = self.handle.request(
            format!("replan-{}-step-{step}", failed.id),
            instruction,
            context,
            REPLANNER_MAX_TURNS,
            &self.model,
        );
        let result = self.handle.invoke("replanner", step, &request);
        if !result.is_success() {
            warn!(error = %result.error_summary(), "replanner agent failed");
            return Vec::new();
        }
        let drafts = decode_proposals(
            &result.output,
            &ProposalDefaults::remediation(failed),
            MAX_REMEDIATION_TASKS,
        );
        info!(proposed = drafts.len(), "replanner proposals decoded");
        drafts
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::AgentResult;
    use crate::io::events::EventLog;
    use crate::test_support::{ScriptedAgent, task};

    fn propose(agent: &ScriptedAgent, failed: &Task) -> Vec<TaskDraft> {
        let temp = tempfile::tempdir().expect("tempdir");
        let events = EventLog::open(temp.path().join("events.jsonl")).expect("events");
        let handle = AgentHandle {
            agent,
            events: &events,
            trace_id: "orch-1",
            root: temp.path(),
            timeout: Duration::from_secs(5),
        };
        Replanner::new(handle, "sonnet").propose(failed, None, &[], 7)
    }

    #[test]
    fn decodes_and_caps_remediation_drafts() {
        let output = r#"```json
[
  {"title": "Fix A", "acceptance": [{"target": "make a"}]},
  {"title": "Fix B"},
  {"title": "Fix C"},
  {"title": "Fix D"}
]
```"#;
        let agent = ScriptedAgent::new().push("replan", AgentResult::success(output));
        let failed = task("task-9");
        let drafts = propose(&agent, &failed);
        assert_eq!(drafts.len(), MAX_REMEDIATION_TASKS);
        assert_eq!(drafts[0].title, "Fix A");
        assert_eq!(drafts[0].depends_on, vec!["task-9".to_string()]);
        assert_eq!(drafts[0].acceptance_criteria.len(), 1);

        let requests = agent.requests();
        assert_eq!(requests[0].label, "replan-task-9-step-7");
        assert_eq!(requests[0].max_turns, REPLANNER_MAX_TURNS);
    }

    #[test]
    fn agent_failure_yields_no_drafts() {
        let agent = ScriptedAgent::new().push("replan", AgentResult::failed("boom"));
        assert!(propose(&agent, &task("task-9")).is_empty());
    }
}
