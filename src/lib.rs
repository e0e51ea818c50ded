//! # Conductor
//!
//! A planner/worker orchestrator over the Gemini API.
//!
//! This library provides:
//! - A retrying gateway in front of every remote model call
//! - Tools the model can request (files, images, content caches, web)
//! - A planner that decomposes a goal and a worker that executes each step
//!
//! ## Architecture
//!
//! 1. Reference files are uploaded (or reused) through the gateway
//! 2. The planner turns the goal into an ordered list of sub-tasks
//! 3. After approval, the worker runs each sub-task with the results of
//!    the previous ones, executing tool calls in a loop
//! 4. A cache created by one step is handed to the next one
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conductor::{agent::TaskManager, llm::Gateway, Config, Session};
//!
//! let session = Session::start(Config::from_env()?)?;
//! let gateway = Arc::new(Gateway::new(&session));
//! let manager = TaskManager::new(&session, gateway);
//! let outcome = manager.run("Write a haiku to haiku.txt", &[], &mut |_: &_| true).await?;
//! ```

pub mod agent;
pub mod config;
pub mod console;
pub mod llm;
pub mod session;
pub mod tools;
pub mod uploads;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use session::Session;
