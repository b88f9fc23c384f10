//! Test execution engine
//!
//! Retry-aware execution units and the coordinator fanning groups out to
//! them.

mod parallel;
mod runner;

pub use parallel::{run_browsers, Coordinator, Grouping};
pub use runner::RetryRunner;

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors that end an execution unit without settling it
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("[{browser_id}] {source}")]
    Adapter {
        browser_id: String,
        #[source]
        source: AdapterError,
    },

    #[error("Execution unit for {browser_id} aborted: {reason}")]
    Aborted { browser_id: String, reason: String },

    #[error("Invalid skip rule: {0}")]
    Skip(#[from] regex::Error),
}
