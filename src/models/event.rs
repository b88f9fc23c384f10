//! Runner event models
//!
//! The fixed event vocabulary emitted by the adapter, forwarded (or
//! rewritten into retries) by the retry runner, and merged by the
//! coordinator into one stream for reporters.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::runnable::{RunnableRef, TestError};

/// File read notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub file: String,
    pub browser_id: String,
}

/// Informational or warning message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub browser_id: String,
    pub message: String,
}

/// Passed test with timing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(flatten)]
    pub runnable: RunnableRef,
    pub duration_ms: u64,
    pub slow: bool,
}

/// Skipped test
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTest {
    #[serde(flatten)]
    pub runnable: RunnableRef,
    pub reason: Option<String>,
}

/// Failure payload shared by test, suite and adapter-level failures
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: TestError,
    /// The failed test, the failed hook, or the node an adapter error hit
    pub runnable: RunnableRef,
    /// Set when a test failed because an enclosing `before all` hook failed
    pub hook: Option<RunnableRef>,
    /// Suite the failure can be attributed to
    pub parent: Option<RunnableRef>,
}

impl Failure {
    pub fn new(error: TestError, runnable: RunnableRef) -> Self {
        Self {
            error,
            runnable,
            hook: None,
            parent: None,
        }
    }

    pub fn with_hook(mut self, hook: RunnableRef) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_parent(mut self, parent: RunnableRef) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Event a retried failure would otherwise have been reported as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureOrigin {
    TestFail,
    SuiteFail,
    Error,
}

/// Failure that will be re-run on the next pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryNotice {
    pub origin: FailureOrigin,
    #[serde(flatten)]
    pub failure: Failure,
    pub retries_left: u32,
    /// Original error of an adapter-level failure re-attributed to its parent
    pub err: Option<TestError>,
}

/// Lifecycle event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerEvent {
    BeforeFileRead(FileEvent),
    AfterFileRead(FileEvent),
    SuiteBegin(RunnableRef),
    SuiteEnd(RunnableRef),
    TestBegin(RunnableRef),
    TestEnd(RunnableRef),
    TestPass(TestReport),
    TestPending(PendingTest),
    TestFail(Failure),
    SuiteFail(Failure),
    Retry(RetryNotice),
    Error(Failure),
    Info(Notice),
    Warning(Notice),
}

impl RunnerEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            RunnerEvent::BeforeFileRead(_) => "BEFORE_FILE_READ",
            RunnerEvent::AfterFileRead(_) => "AFTER_FILE_READ",
            RunnerEvent::SuiteBegin(_) => "SUITE_BEGIN",
            RunnerEvent::SuiteEnd(_) => "SUITE_END",
            RunnerEvent::TestBegin(_) => "TEST_BEGIN",
            RunnerEvent::TestEnd(_) => "TEST_END",
            RunnerEvent::TestPass(_) => "TEST_PASS",
            RunnerEvent::TestPending(_) => "TEST_PENDING",
            RunnerEvent::TestFail(_) => "TEST_FAIL",
            RunnerEvent::SuiteFail(_) => "SUITE_FAIL",
            RunnerEvent::Retry(_) => "RETRY",
            RunnerEvent::Error(_) => "ERROR",
            RunnerEvent::Info(_) => "INFO",
            RunnerEvent::Warning(_) => "WARNING",
        }
    }

    /// Browser the event belongs to
    pub fn browser_id(&self) -> &str {
        match self {
            RunnerEvent::BeforeFileRead(e) | RunnerEvent::AfterFileRead(e) => &e.browser_id,
            RunnerEvent::SuiteBegin(r)
            | RunnerEvent::SuiteEnd(r)
            | RunnerEvent::TestBegin(r)
            | RunnerEvent::TestEnd(r) => &r.browser_id,
            RunnerEvent::TestPass(report) => &report.runnable.browser_id,
            RunnerEvent::TestPending(pending) => &pending.runnable.browser_id,
            RunnerEvent::TestFail(f) | RunnerEvent::SuiteFail(f) | RunnerEvent::Error(f) => {
                &f.runnable.browser_id
            }
            RunnerEvent::Retry(notice) => &notice.failure.runnable.browser_id,
            RunnerEvent::Info(n) | RunnerEvent::Warning(n) => &n.browser_id,
        }
    }

    /// Whether the event reports a failure that will not be retried
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            RunnerEvent::TestFail(_) | RunnerEvent::SuiteFail(_) | RunnerEvent::Error(_)
        )
    }
}

impl fmt::Display for RunnerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.browser_id())
    }
}
