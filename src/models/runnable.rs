//! Runnable identity models
//!
//! Defines the structural identity of tests, suites and hooks, and the
//! error values test bodies settle with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of runnable node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnableKind {
    Test,
    Suite,
    Hook,
}

impl fmt::Display for RunnableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnableKind::Test => write!(f, "test"),
            RunnableKind::Suite => write!(f, "suite"),
            RunnableKind::Hook => write!(f, "hook"),
        }
    }
}

/// Hook position within a suite
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    BeforeAll,
    BeforeEach,
    AfterEach,
    AfterAll,
}

impl HookKind {
    /// Title used for the hook node, e.g. `"before all" hook`
    pub fn title(&self) -> &'static str {
        match self {
            HookKind::BeforeAll => "\"before all\" hook",
            HookKind::BeforeEach => "\"before each\" hook",
            HookKind::AfterEach => "\"after each\" hook",
            HookKind::AfterAll => "\"after all\" hook",
        }
    }
}

/// Structural reference to one runnable in one browser
///
/// `(browser_id, file, full_title)` identifies a logical runnable across
/// passes even though every pass builds a fresh tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunnableRef {
    pub kind: RunnableKind,
    pub title: String,
    pub full_title: String,
    pub file: String,
    pub browser_id: String,
}

impl RunnableRef {
    pub fn new(
        kind: RunnableKind,
        title: impl Into<String>,
        full_title: impl Into<String>,
        file: impl Into<String>,
        browser_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            full_title: full_title.into(),
            file: file.into(),
            browser_id: browser_id.into(),
        }
    }

    /// Test reference whose own title is the last word of `full_title`
    pub fn test(
        full_title: impl Into<String>,
        file: impl Into<String>,
        browser_id: impl Into<String>,
    ) -> Self {
        let full_title = full_title.into();
        let title = match full_title.rsplit_once(' ') {
            Some((_, last)) => last.to_string(),
            None => full_title.clone(),
        };
        Self::new(RunnableKind::Test, title, full_title, file, browser_id)
    }

    pub fn is_test(&self) -> bool {
        self.kind == RunnableKind::Test
    }

    /// Whether two refs denote the same logical runnable
    pub fn same_identity(&self, other: &RunnableRef) -> bool {
        self.browser_id == other.browser_id
            && self.file == other.file
            && self.full_title == other.full_title
    }
}

impl fmt::Display for RunnableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.browser_id, self.full_title)
    }
}

/// How a runnable failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Assertion or rejected step
    Failure,
    /// Runnable exceeded its timeout
    Timeout,
    /// Error escaping the runnable, e.g. a lost browser session
    Uncaught,
}

/// Error a test or hook body settles with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TestError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Failure,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!("Timeout of {timeout_ms}ms exceeded"),
        }
    }

    pub fn uncaught(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Uncaught,
            message: message.into(),
        }
    }

    pub fn is_uncaught(&self) -> bool {
        self.kind == ErrorKind::Uncaught
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}
