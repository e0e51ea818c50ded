//! Plan, execution ledger and workflow state.

use serde::Serialize;
use thiserror::Error;

use crate::llm::CacheHandle;

/// Longest rendering of one prior result inside a worker prompt.
const MAX_CONTEXT_RESULT_CHARS: usize = 4_000;

/// Ordered sub-task descriptions produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan(Vec<String>);

impl Plan {
    pub fn new(steps: Vec<String>) -> Self {
        Self(steps)
    }

    pub fn steps(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Outcome of one sub-task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubTaskResult {
    /// Final answer with thoughts excluded.
    pub text: String,

    /// Cache created while executing the sub-task, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_handle: Option<CacheHandle>,

    /// The gateway gave up; `text` is the failure sentinel.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl SubTaskResult {
    pub fn completed(text: impl Into<String>, cache_handle: Option<CacheHandle>) -> Self {
        Self {
            text: text.into(),
            cache_handle,
            failed: false,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache_handle: None,
            failed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub sub_task: String,
    pub result: SubTaskResult,
}

/// Append-only record of executed sub-tasks, in plan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionLedger {
    entries: Vec<LedgerEntry>,
}

impl ExecutionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sub_task: impl Into<String>, result: SubTaskResult) {
        self.entries.push(LedgerEntry {
            sub_task: sub_task.into(),
            result,
        });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact JSON rendering of prior results for the worker prompt.
    pub fn render_context(&self) -> String {
        let items: Vec<serde_json::Value> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                serde_json::json!({
                    "step": i + 1,
                    "sub_task": entry.sub_task,
                    "result": truncate_chars(&entry.result.text, MAX_CONTEXT_RESULT_CHARS),
                })
            })
            .collect();
        serde_json::Value::Array(items).to_string()
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}

/// Lifecycle of one workflow. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initial,
    Planned,
    Executing,
    Done,
    Aborted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid workflow transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },
}

impl WorkflowState {
    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        matches!(
            (self, next),
            (Initial, Planned) | (Planned, Executing) | (Planned, Aborted) | (Executing, Done)
        )
    }

    pub fn transition(self, next: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(WorkflowError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Done | WorkflowState::Aborted)
    }
}
