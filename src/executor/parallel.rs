//! Fan-out coordination
//!
//! Runs one [`RetryRunner`] per suite-path group concurrently and merges
//! their event streams into a single channel.

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use super::runner::RetryRunner;
use super::RunnerError;
use crate::adapter::{Adapter, SuiteLoader, SuiteTree, TitleRegistry};
use crate::browser::{BrowserAgent, BrowserPool};
use crate::config::{AppConfig, BrowserSettings, SystemConfig};
use crate::models::{RunSummary, RunnerEvent, UnitReport};
use crate::skip::TestSkipper;

/// How suite paths are split into execution units
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grouping {
    /// One unit per file
    File,
    /// One unit for all files
    Single,
}

impl Grouping {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file" => Some(Grouping::File),
            "single" | "all" => Some(Grouping::Single),
            _ => None,
        }
    }

    pub fn split(self, paths: Vec<String>) -> Vec<Vec<String>> {
        if paths.is_empty() {
            return Vec::new();
        }
        match self {
            Grouping::File => paths.into_iter().map(|p| vec![p]).collect(),
            Grouping::Single => vec![paths],
        }
    }
}

/// Coordinator for every group of one browser
pub struct Coordinator {
    settings: BrowserSettings,
    pool: Arc<dyn BrowserPool>,
    loader: Arc<dyn SuiteLoader>,
    system: SystemConfig,
    skipper: Arc<TestSkipper>,
}

impl Coordinator {
    pub fn new(
        settings: BrowserSettings,
        pool: Arc<dyn BrowserPool>,
        loader: Arc<dyn SuiteLoader>,
        system: SystemConfig,
    ) -> Self {
        Self {
            settings,
            pool,
            loader,
            system,
            skipper: Arc::new(TestSkipper::default()),
        }
    }

    pub fn with_skipper(mut self, skipper: Arc<TestSkipper>) -> Self {
        self.skipper = skipper;
        self
    }

    pub fn browser_id(&self) -> &str {
        &self.settings.browser_id
    }

    fn agent(&self) -> BrowserAgent {
        BrowserAgent::new(self.settings.browser_id.clone(), self.pool.clone())
    }

    /// Run every group concurrently and wait for all of them
    ///
    /// Fails with the first unit error once every unit has settled.
    pub async fn run(
        &self,
        groups: Vec<Vec<String>>,
        events: UnboundedSender<RunnerEvent>,
    ) -> Result<RunSummary, RunnerError> {
        let started_at = Utc::now();
        info!(
            "[{}] running {} groups (retry {}, {} sessions)",
            self.browser_id(),
            groups.len(),
            self.settings.retry,
            self.settings.sessions_per_browser
        );

        let mut handles = Vec::new();
        for paths in groups {
            let mut runner = RetryRunner::create(
                paths,
                self.agent(),
                self.loader.clone(),
                self.system.mocha_opts.clone(),
                // each unit gets its own copy of the shared context
                Arc::new(self.system.ctx.clone()),
                self.settings.retry,
            )
            .with_skipper(self.skipper.clone())
            .with_events(events.clone());

            handles.push(tokio::spawn(async move { runner.run(Vec::new()).await }));
        }
        drop(events);

        let mut reports: Vec<UnitReport> = Vec::new();
        let mut first_error = None;
        for result in join_all(handles).await {
            let outcome = result.map_err(|e| RunnerError::Aborted {
                browser_id: self.settings.browser_id.clone(),
                reason: e.to_string(),
            });
            match outcome.and_then(|unit| unit) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(RunSummary::new(started_at, reports))
    }

    /// Build the full tree for some paths without running it
    pub fn build_suite_tree(&self, paths: &[String]) -> Result<SuiteTree, RunnerError> {
        let loaded = Adapter::create(
            self.system.mocha_opts.clone(),
            self.agent(),
            Arc::new(self.system.ctx.clone()),
            self.loader.clone(),
        )
        .attach_title_validator(TitleRegistry::new())
        .apply_skip(self.skipper.clone())
        .add_files(paths)
        .map_err(|source| RunnerError::Adapter {
            browser_id: self.settings.browser_id.clone(),
            source,
        })?;
        Ok(loaded.into_tree())
    }
}

/// Run the same groups in several browsers at once
pub async fn run_browsers(
    config: &AppConfig,
    browser_ids: &[String],
    pool: Arc<dyn BrowserPool>,
    loader: Arc<dyn SuiteLoader>,
    groups: Vec<Vec<String>>,
    events: UnboundedSender<RunnerEvent>,
) -> Result<RunSummary, RunnerError> {
    let started_at = Utc::now();
    let skipper = Arc::new(TestSkipper::new(&config.skip)?);

    let coordinators: Vec<_> = browser_ids
        .iter()
        .map(|id| {
            Coordinator::new(
                config.for_browser(id),
                pool.clone(),
                loader.clone(),
                config.system.clone(),
            )
            .with_skipper(skipper.clone())
        })
        .collect();

    let runs = coordinators
        .iter()
        .map(|c| c.run(groups.clone(), events.clone()));
    let results = join_all(runs).await;
    drop(events);

    let mut summaries = Vec::new();
    for result in results {
        summaries.push(result?);
    }
    Ok(RunSummary::combine(started_at, summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FnLoader, TestContext};
    use crate::browser::LocalPool;
    use crate::models::TestError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn settings(browser_id: &str, retry: u32) -> BrowserSettings {
        BrowserSettings {
            browser_id: browser_id.to_string(),
            retry,
            sessions_per_browser: 2,
        }
    }

    fn always_failing(calls: Arc<AtomicUsize>) -> FnLoader {
        FnLoader::new()
            .with_file("a.yaml", move |b| {
                let calls = calls.clone();
                b.suite("a", move |s| {
                    s.test("fails", move |_: TestContext| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(TestError::failure("nope")) }
                    });
                });
            })
            .with_file("b.yaml", |b| {
                b.suite("b", |s| {
                    s.test("passes", |_: TestContext| async { Ok::<(), TestError>(()) });
                });
            })
    }

    #[test]
    fn test_grouping() {
        let paths = vec!["a".to_string(), "b".to_string()];
        assert_eq!(Grouping::File.split(paths.clone()).len(), 2);
        assert_eq!(Grouping::Single.split(paths).len(), 1);
        assert!(Grouping::File.split(Vec::new()).is_empty());
        assert_eq!(Grouping::from_str("FILE"), Some(Grouping::File));
        assert_eq!(Grouping::from_str("bogus"), None);
    }

    #[tokio::test]
    async fn test_groups_are_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(LocalPool::new().with_browser("chrome", 2));
        let coordinator = Coordinator::new(
            settings("chrome", 2),
            pool,
            Arc::new(always_failing(calls.clone())),
            SystemConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = coordinator
            .run(
                vec![vec!["a.yaml".to_string()], vec!["b.yaml".to_string()]],
                tx,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(summary.units.len(), 2);

        let a = summary.units.iter().find(|u| u.paths[0] == "a.yaml").unwrap();
        let b = summary.units.iter().find(|u| u.paths[0] == "b.yaml").unwrap();
        assert_eq!(a.retries_left, 0);
        assert_eq!(b.retries_left, 2);
        assert_eq!(b.passes, 1);
        assert!(!summary.is_success());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let fails = events.iter().filter(|e| e.name() == "TEST_FAIL").count();
        assert_eq!(fails, 1);
    }

    #[tokio::test]
    async fn test_browsers_have_independent_budgets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool: Arc<dyn BrowserPool> = Arc::new(
            LocalPool::new()
                .with_browser("chrome", 1)
                .with_browser("firefox", 1),
        );

        let mut config = AppConfig::default();
        config.browsers.insert(
            "chrome".to_string(),
            crate::config::BrowserConfig {
                retry: Some(1),
                ..Default::default()
            },
        );
        config.browsers.insert(
            "firefox".to_string(),
            crate::config::BrowserConfig {
                retry: Some(3),
                ..Default::default()
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = run_browsers(
            &config,
            &["chrome".to_string(), "firefox".to_string()],
            pool,
            Arc::new(always_failing(calls.clone())),
            vec![vec!["a.yaml".to_string()]],
            tx,
        )
        .await
        .unwrap();

        // 2 attempts in chrome, 4 in firefox
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        let passes: Vec<_> = summary
            .units
            .iter()
            .map(|u| (u.browser_id.clone(), u.passes))
            .collect();
        assert!(passes.contains(&("chrome".to_string(), 2)));
        assert!(passes.contains(&("firefox".to_string(), 4)));

        let mut retries = 0;
        while let Some(event) = rx.recv().await {
            if event.name() == "RETRY" {
                retries += 1;
            }
        }
        assert_eq!(retries, 4);
    }

    #[tokio::test]
    async fn test_unit_error_reported_after_all_settle() {
        let loader = FnLoader::new().with_file("good.yaml", |b| {
            b.suite("g", |s| {
                s.test("t", |_: TestContext| async { Ok::<(), TestError>(()) });
            });
        });
        let coordinator = Coordinator::new(
            settings("chrome", 0),
            Arc::new(LocalPool::new().with_browser("chrome", 1)),
            Arc::new(loader),
            SystemConfig::default(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let err = coordinator
            .run(
                vec![vec!["missing.yaml".to_string()], vec!["good.yaml".to_string()]],
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Adapter { .. }));

        let mut passed = 0;
        while let Some(event) = rx.recv().await {
            if event.name() == "TEST_PASS" {
                passed += 1;
            }
        }
        assert_eq!(passed, 1);
    }

    #[test]
    fn test_build_suite_tree_does_not_acquire() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let r = r.clone();
            b.suite("s", move |s| {
                s.before_all(move |_: TestContext| {
                    r.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<(), TestError>(()) }
                });
                s.test("t", |_: TestContext| async { Ok::<(), TestError>(()) });
            });
        });

        // no browsers registered: any acquisition would fail
        let coordinator = Coordinator::new(
            settings("chrome", 0),
            Arc::new(LocalPool::new()),
            Arc::new(loader),
            SystemConfig::default(),
        );
        let tree = coordinator
            .build_suite_tree(&["a.yaml".to_string()])
            .unwrap();

        assert_eq!(tree.tests().len(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
