//! Planner and worker agents.
//!
//! A workflow runs in two phases:
//! 1. The [`TaskManager`] asks the model to decompose the goal into an
//!    ordered [`Plan`] and gets it approved
//! 2. Each sub-task is handed to the [`Worker`] in order; results are
//!    appended to the [`ExecutionLedger`] and fed to the next sub-task

mod ledger;
mod manager;
mod prompt;
mod worker;

pub use ledger::{ExecutionLedger, LedgerEntry, Plan, SubTaskResult, WorkflowError, WorkflowState};
pub use manager::{PlanApprover, TaskManager, WorkflowOutcome};
pub use prompt::{build_planner_prompt, build_worker_prompt};
pub use worker::{Worker, FAILURE_SENTINEL, TOOLS_ONLY_SENTINEL};
