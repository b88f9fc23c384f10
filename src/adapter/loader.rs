//! Suite loaders
//!
//! A loader turns a suite path into suites, tests and hooks. It is invoked
//! on every pass, so trees are always rebuilt from their source.

use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use super::tree::{SuiteBuilder, TestContext};
use super::AdapterError;
use crate::config::is_yaml_file;
use crate::models::{HookKind, TestError};

/// Builds the suites declared by one path
pub trait SuiteLoader: Send + Sync {
    fn load(&self, path: &str, builder: &mut SuiteBuilder<'_>) -> Result<(), AdapterError>;
}

type Define = Arc<dyn Fn(&mut SuiteBuilder<'_>) + Send + Sync>;

/// Loader backed by registered closures
#[derive(Clone, Default)]
pub struct FnLoader {
    suites: HashMap<String, Define>,
}

impl FnLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(
        mut self,
        path: impl Into<String>,
        define: impl Fn(&mut SuiteBuilder<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.suites.insert(path.into(), Arc::new(define));
        self
    }
}

impl SuiteLoader for FnLoader {
    fn load(&self, path: &str, builder: &mut SuiteBuilder<'_>) -> Result<(), AdapterError> {
        let define = self
            .suites
            .get(path)
            .ok_or_else(|| AdapterError::NotFound(path.to_string()))?;
        define(builder);
        Ok(())
    }
}

/// Suite file layout
#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    suites: Vec<SuiteDef>,
}

#[derive(Debug, Deserialize)]
struct SuiteDef {
    title: String,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    before_all: Vec<Step>,
    #[serde(default)]
    before_each: Vec<Step>,
    #[serde(default)]
    after_each: Vec<Step>,
    #[serde(default)]
    after_all: Vec<Step>,
    #[serde(default)]
    tests: Vec<TestDef>,
    #[serde(default)]
    suites: Vec<SuiteDef>,
}

#[derive(Debug, Deserialize)]
struct TestDef {
    title: String,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

/// Scripted step of a test or hook
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    PauseMs(u64),
    Log(String),
    Fail(String),
    /// Error escaping the test, e.g. a dropped session
    Crash(String),
    /// Fail the first `fails` attempts of this runnable in this browser
    Flaky { fails: u32, message: String },
}

type Attempts = Arc<Mutex<HashMap<String, u32>>>;

#[derive(Clone)]
struct Script {
    steps: Arc<Vec<Step>>,
    attempts: Attempts,
}

impl Script {
    async fn run(self, ctx: TestContext) -> Result<(), TestError> {
        for step in self.steps.iter() {
            match step {
                Step::PauseMs(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
                Step::Log(message) => {
                    info!("[{}] {}", ctx.browser_id, message);
                    ctx.info(message.clone());
                }
                Step::Fail(message) => return Err(TestError::failure(message.clone())),
                Step::Crash(message) => return Err(TestError::uncaught(message.clone())),
                Step::Flaky { fails, message } => {
                    let key = format!(
                        "{}\u{0}{}\u{0}{}",
                        ctx.browser_id, ctx.runnable.file, ctx.runnable.full_title
                    );
                    let attempt = {
                        let mut attempts = self
                            .attempts
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        let count = attempts.entry(key).or_insert(0);
                        *count += 1;
                        *count
                    };
                    if attempt <= *fails {
                        return Err(TestError::failure(message.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Loader for YAML suite files
#[derive(Clone, Default)]
pub struct YamlLoader {
    attempts: Attempts,
}

impl YamlLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(
        &self,
        steps: Vec<Step>,
    ) -> impl Fn(TestContext) -> BoxFuture<'static, Result<(), TestError>> + Send + Sync + 'static
    {
        let script = Script {
            steps: Arc::new(steps),
            attempts: self.attempts.clone(),
        };
        move |ctx| Box::pin(script.clone().run(ctx))
    }

    fn define(&self, suite: SuiteDef, builder: &mut SuiteBuilder<'_>) {
        let SuiteDef {
            title,
            skip,
            before_all,
            before_each,
            after_each,
            after_all,
            tests,
            suites,
        } = suite;

        builder.suite(&title, |s| {
            if let Some(reason) = skip {
                s.skip(non_empty(reason));
            }

            for (kind, steps) in [
                (HookKind::BeforeAll, before_all),
                (HookKind::BeforeEach, before_each),
                (HookKind::AfterEach, after_each),
                (HookKind::AfterAll, after_all),
            ] {
                if !steps.is_empty() {
                    s.hook(kind, self.script(steps));
                }
            }

            for test in tests {
                match test.skip {
                    Some(reason) => {
                        s.test_pending(&test.title, non_empty(reason));
                    }
                    None => {
                        s.test(&test.title, self.script(test.steps));
                    }
                }
            }

            for nested in suites {
                self.define(nested, s);
            }
        });
    }
}

fn non_empty(reason: String) -> Option<String> {
    if reason.trim().is_empty() {
        None
    } else {
        Some(reason)
    }
}

impl SuiteLoader for YamlLoader {
    fn load(&self, path: &str, builder: &mut SuiteBuilder<'_>) -> Result<(), AdapterError> {
        let content = std::fs::read_to_string(path).map_err(|source| AdapterError::Read {
            path: path.to_string(),
            source,
        })?;

        let file: SuiteFile = serde_yaml::from_str(&content).map_err(|e| AdapterError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;

        for suite in file.suites {
            self.define(suite, builder);
        }
        Ok(())
    }
}

/// Expand directories into the suite files they contain
pub fn collect_suite_files(paths: &[String]) -> Result<Vec<String>, AdapterError> {
    let mut files = Vec::new();

    for path in paths {
        let p = Path::new(path);
        if p.is_dir() {
            let entries = std::fs::read_dir(p).map_err(|source| AdapterError::Read {
                path: path.clone(),
                source,
            })?;

            let mut found: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.is_file() && is_yaml_file(p))
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}
