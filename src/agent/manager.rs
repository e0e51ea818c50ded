//! Planning and sequential execution of a workflow.

use std::sync::Arc;

use serde_json::json;

use crate::llm::{Gateway, GenerationConfig, LlmRequest, PromptPart, ReferenceFile};
use crate::session::{LogSink, Session};

use super::ledger::{ExecutionLedger, Plan, WorkflowError, WorkflowState};
use super::prompt::build_planner_prompt;
use super::worker::Worker;

/// Decides whether a plan is executed.
pub trait PlanApprover {
    fn approve(&mut self, plan: &Plan) -> bool;
}

impl<F> PlanApprover for F
where
    F: FnMut(&Plan) -> bool,
{
    fn approve(&mut self, plan: &Plan) -> bool {
        self(plan)
    }
}

/// Final state of a workflow together with what it produced.
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub state: WorkflowState,
    pub plan: Plan,
    pub ledger: ExecutionLedger,
}

/// Owns the plan and drives the worker through it.
pub struct TaskManager {
    session: Session,
    gateway: Arc<Gateway>,
    worker: Worker,
    log: Arc<dyn LogSink>,
}

impl TaskManager {
    pub fn new(session: &Session, gateway: Arc<Gateway>) -> Self {
        let worker = Worker::new(session, gateway.clone());
        Self::with_worker(session, gateway, worker)
    }

    pub fn with_worker(session: &Session, gateway: Arc<Gateway>, worker: Worker) -> Self {
        Self {
            session: session.clone(),
            gateway,
            worker,
            log: session.log(),
        }
    }

    /// Split `goal` into ordered sub-tasks.
    ///
    /// Any response that is not a JSON array of strings, and any gateway
    /// failure, yields the single-step plan `[goal]`.
    pub async fn decompose(&self, goal: &str) -> Plan {
        let config = self.session.config();
        let request = LlmRequest::new(&config.text_model, vec![PromptPart::text(goal)])
            .with_system_instruction(build_planner_prompt(self.worker.tools()))
            .with_tools(self.worker.tools().declarations())
            .with_config(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(json!({ "type": "array", "items": { "type": "string" } })),
                thinking_budget: Some(config.planner_thinking_budget),
                ..Default::default()
            });

        let text = match self.gateway.call(&request).await {
            Ok(response) => response.text(),
            Err(failure) => {
                self.log.write(
                    "Planner",
                    &format!("Planning call failed, using the goal as a single step: {}", failure),
                );
                return Plan::new(vec![goal.to_string()]);
            }
        };

        match serde_json::from_str::<Vec<String>>(text.trim()) {
            Ok(steps) => {
                if steps.is_empty() {
                    tracing::warn!("Planner returned an empty plan");
                }
                self.log.write("Planner", &format!("Plan with {} step(s)", steps.len()));
                Plan::new(steps)
            }
            Err(e) => {
                self.log.write(
                    "Planner",
                    &format!("Unusable plan ({}), using the goal as a single step", e),
                );
                Plan::new(vec![goal.to_string()])
            }
        }
    }

    /// Plan, ask for approval, then execute every step in order.
    pub async fn run(
        &self,
        goal: &str,
        references: &[ReferenceFile],
        approver: &mut dyn PlanApprover,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut state = WorkflowState::Initial;
        let plan = self.decompose(goal).await;
        state = state.transition(WorkflowState::Planned)?;

        let mut ledger = ExecutionLedger::new();
        if !approver.approve(&plan) {
            self.log.write("TaskManager", "Plan rejected; nothing was executed");
            state = state.transition(WorkflowState::Aborted)?;
            return Ok(WorkflowOutcome { state, plan, ledger });
        }
        state = state.transition(WorkflowState::Executing)?;

        for (i, sub_task) in plan.iter().enumerate() {
            self.log.write(
                "TaskManager",
                &format!("Step {}/{}: {}", i + 1, plan.len(), sub_task),
            );
            let result = self.worker.execute(sub_task, &ledger, references, goal).await;
            ledger.record(sub_task, result);
        }

        state = state.transition(WorkflowState::Done)?;
        self.log.write(
            "TaskManager",
            &format!(
                "Workflow complete. Outputs are in {}",
                self.session.layout().outputs_dir.display()
            ),
        );
        Ok(WorkflowOutcome { state, plan, ledger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::worker::FAILURE_SENTINEL;
    use crate::llm::{LlmError, PromptPart};
    use crate::testing::{reference_file, ScriptedTransport, TestHarness};

    fn manager(harness: &TestHarness) -> TaskManager {
        TaskManager::new(&harness.session, harness.gateway())
    }

    fn approve_all() -> impl FnMut(&Plan) -> bool {
        |_: &Plan| true
    }

    #[tokio::test]
    async fn valid_plan_is_returned_exactly() {
        for body in [
            r#"["a", "b", "c"]"#,
            r#"  ["only one"]  "#,
            r#"[]"#,
            r#"["dup", "dup"]"#,
        ] {
            let transport = ScriptedTransport::new();
            transport.push_text(body);
            let harness = TestHarness::new(transport);

            let plan = manager(&harness).decompose("goal").await;
            let expected: Vec<String> = serde_json::from_str(body.trim()).unwrap();
            assert_eq!(plan.steps(), expected.as_slice());
        }
    }

    #[tokio::test]
    async fn malformed_or_misshapen_plan_falls_back_to_goal() {
        for body in [
            "not json",
            r#"{"steps": ["a"]}"#,
            r#"[1, 2]"#,
            r#""a string""#,
            "```json\n[\"a\"]\n```",
        ] {
            let transport = ScriptedTransport::new();
            transport.push_text(body);
            let harness = TestHarness::new(transport);

            let plan = manager(&harness).decompose("the goal").await;
            assert_eq!(plan.steps(), &["the goal".to_string()], "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn planner_request_constrains_output() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["x"]"#);
        let harness = TestHarness::new(transport);

        manager(&harness).decompose("goal").await;

        let request = &harness.transport.requests()[0];
        assert_eq!(request.config.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(
            request.config.response_schema,
            Some(json!({ "type": "array", "items": { "type": "string" } }))
        );
        assert_eq!(request.config.thinking_budget, Some(1024));
        assert_eq!(request.tools.len(), 3);
        assert!(request
            .system_instruction
            .as_deref()
            .unwrap()
            .contains("MUST create a content cache"));
    }

    #[tokio::test]
    async fn planner_failure_falls_back_to_goal() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.push_error(LlmError::Timeout("slow".to_string()));
        }
        let harness = TestHarness::new(transport);

        let plan = manager(&harness).decompose("do it").await;
        assert_eq!(plan.steps(), &["do it".to_string()]);
    }

    #[tokio::test]
    async fn single_step_fallback_runs_once() {
        let transport = ScriptedTransport::new();
        transport.push_text("not json");
        transport.push_text("hello");
        let harness = TestHarness::new(transport);

        let outcome = manager(&harness)
            .run("write hello", &[], &mut approve_all())
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkflowState::Done);
        assert_eq!(outcome.plan.steps(), &["write hello".to_string()]);
        assert_eq!(outcome.ledger.len(), 1);
        assert_eq!(harness.transport.generate_calls(), 2);
    }

    #[tokio::test]
    async fn ledger_matches_plan_positionally() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["one", "two", "three", "four"]"#);
        for answer in ["1", "2", "3", "4"] {
            transport.push_text(answer);
        }
        let harness = TestHarness::new(transport);

        let outcome = manager(&harness)
            .run("count", &[], &mut approve_all())
            .await
            .unwrap();

        assert_eq!(outcome.ledger.len(), outcome.plan.len());
        for (entry, step) in outcome.ledger.entries().iter().zip(outcome.plan.iter()) {
            assert_eq!(entry.sub_task, step);
        }
        let answers: Vec<&str> = outcome.ledger.entries().iter().map(|e| e.result.text.as_str()).collect();
        assert_eq!(answers, vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn two_step_cache_propagation() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["create cache from files", "summarize using cache"]"#);
        transport.push_text("cachedContents/abc123");
        transport.push_text("summary");
        let harness = TestHarness::new(transport);
        let references = vec![reference_file("a1", "big.pdf")];

        let outcome = manager(&harness)
            .run("summarize", &references, &mut approve_all())
            .await
            .unwrap();
        assert_eq!(outcome.ledger.len(), 2);

        let requests = harness.transport.requests();
        let first = &requests[1];
        assert_eq!(first.config.cached_content, None);
        assert!(first.prompt_parts().iter().any(|p| matches!(p, PromptPart::File(_))));

        let second = &requests[2];
        assert_eq!(second.config.cached_content.as_deref(), Some("cachedContents/abc123"));
        assert!(!second.prompt_parts().iter().any(|p| matches!(p, PromptPart::File(_))));
    }

    #[tokio::test]
    async fn exhausted_retries_do_not_stop_the_workflow() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["s1", "s2", "s3"]"#);
        transport.push_text("r1");
        for _ in 0..3 {
            transport.push_error(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            });
        }
        transport.push_text("r3");
        let harness = TestHarness::new(transport);

        let outcome = manager(&harness)
            .run("goal", &[], &mut approve_all())
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkflowState::Done);
        assert_eq!(outcome.ledger.len(), 3);
        let entries = outcome.ledger.entries();
        assert_eq!(entries[1].result.text, FAILURE_SENTINEL);
        assert!(entries[1].result.failed);
        assert_eq!(entries[2].result.text, "r3");
        // planner + s1 + three attempts for s2 + s3
        assert_eq!(harness.transport.generate_calls(), 6);
    }

    #[tokio::test]
    async fn rejected_plan_executes_nothing() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["a", "b"]"#);
        let harness = TestHarness::new(transport);

        let mut seen = Vec::new();
        let mut reject = |plan: &Plan| {
            seen.push(plan.len());
            false
        };
        let outcome = manager(&harness)
            .run("goal", &[], &mut reject)
            .await
            .unwrap();

        assert_eq!(seen, vec![2]);
        assert_eq!(outcome.state, WorkflowState::Aborted);
        assert!(outcome.ledger.is_empty());
        assert_eq!(harness.transport.generate_calls(), 1);
    }

    #[tokio::test]
    async fn completion_message_names_output_directory() {
        let transport = ScriptedTransport::new();
        transport.push_text(r#"["a"]"#);
        transport.push_text("ok");
        let harness = TestHarness::new(transport);

        manager(&harness)
            .run("goal", &[], &mut approve_all())
            .await
            .unwrap();

        let outputs = harness.session.layout().outputs_dir.display().to_string();
        assert!(harness
            .log
            .messages_from("TaskManager")
            .last()
            .unwrap()
            .contains(&outputs));
    }
}
