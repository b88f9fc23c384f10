//! Data models for cross-browser test execution
//!
//! This module contains the identity, event and summary types shared by the
//! adapter, the retry runner and the coordinator.

mod event;
mod runnable;
mod summary;

pub use event::{
    Failure, FailureOrigin, FileEvent, Notice, PendingTest, RetryNotice, RunnerEvent, TestReport,
};
pub use runnable::{ErrorKind, HookKind, RunnableKind, RunnableRef, TestError};
pub use summary::{RunSummary, UnitLedger, UnitReport, UnitStats};
