//! Retry-aware suite runner
//!
//! One execution unit: a set of suite paths run against one browser. Each
//! pass rebuilds the tree, runs it, and collects the runnables that failed
//! while budget remained; those become the inclusion filter of the next
//! pass.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use super::RunnerError;
use crate::adapter::{Adapter, SuiteLoader, SuiteTree, TitleRegistry};
use crate::browser::BrowserAgent;
use crate::config::MochaOpts;
use crate::models::{
    Failure, FailureOrigin, RetryNotice, RunnableKind, RunnableRef, RunnerEvent, TestError,
    UnitLedger, UnitReport,
};
use crate::retry::MatcherSet;
use crate::skip::TestSkipper;
use crate::utils::Timer;

/// Execution unit for one group of suite paths in one browser
pub struct RetryRunner {
    paths: Vec<String>,
    agent: BrowserAgent,
    loader: Arc<dyn SuiteLoader>,
    opts: MochaOpts,
    ctx: Arc<Value>,
    retries_left: u32,
    passes: u32,
    titles: Option<TitleRegistry>,
    skipper: Option<Arc<TestSkipper>>,
    events: Option<UnboundedSender<RunnerEvent>>,
}

impl RetryRunner {
    pub fn create(
        paths: Vec<String>,
        agent: BrowserAgent,
        loader: Arc<dyn SuiteLoader>,
        opts: MochaOpts,
        ctx: Arc<Value>,
        retry: u32,
    ) -> Self {
        Self {
            paths,
            agent,
            loader,
            opts,
            ctx,
            retries_left: retry,
            passes: 0,
            titles: Some(TitleRegistry::new()),
            skipper: None,
            events: None,
        }
    }

    /// Skip rules evaluated before the first pass only
    pub fn with_skipper(mut self, skipper: Arc<TestSkipper>) -> Self {
        self.skipper = Some(skipper);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<RunnerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn browser_id(&self) -> &str {
        self.agent.browser_id()
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    /// Run passes until nothing is left to retry or the budget is spent
    ///
    /// An empty `to_run` runs the whole tree.
    pub async fn run(&mut self, to_run: Vec<RunnableRef>) -> Result<UnitReport, RunnerError> {
        let timer = Timer::start(format!("{} {}", self.browser_id(), self.paths.join(",")));
        let mut ledger = UnitLedger::default();
        let mut to_run = to_run;

        loop {
            self.passes += 1;
            info!(
                "[{}] pass {} over {} ({} retries left, filter: {})",
                self.browser_id(),
                self.passes,
                self.paths.join(", "),
                self.retries_left,
                if to_run.is_empty() {
                    "all".to_string()
                } else {
                    format!("{} runnables", to_run.len())
                }
            );

            let to_retry = self.run_pass(&to_run, &mut ledger).await?;
            if to_retry.is_empty() {
                break;
            }

            self.retries_left -= 1;
            debug!(
                "[{}] retrying {} tests",
                self.browser_id(),
                to_retry.len()
            );
            to_run = to_retry;
        }

        let report = UnitReport {
            browser_id: self.browser_id().to_string(),
            paths: self.paths.clone(),
            passes: self.passes,
            retries_left: self.retries_left,
            stats: ledger.stats(),
            duration_ms: timer.stop().as_millis() as u64,
        };
        info!("{}", report);
        Ok(report)
    }

    async fn run_pass(
        &mut self,
        to_run: &[RunnableRef],
        ledger: &mut UnitLedger,
    ) -> Result<Vec<RunnableRef>, RunnerError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let matchers = MatcherSet::new(to_run);

        let mut adapter = Adapter::create(
            self.opts.clone(),
            self.agent.clone(),
            self.ctx.clone(),
            self.loader.clone(),
        )
        .attach_test_filter(move |candidate, browser_id| matchers.accepts(candidate, browser_id));

        // titles are validated once; retry passes see a narrowed tree
        if let Some(titles) = self.titles.take() {
            adapter = adapter.attach_title_validator(titles);
        }
        if self.passes == 1 {
            if let Some(skipper) = self.skipper.as_ref().filter(|s| !s.is_empty()) {
                adapter = adapter.apply_skip(skipper.clone());
            }
        }

        let loaded = adapter
            .attach_emit_fn(tx)
            .add_files(&self.paths)
            .map_err(|source| RunnerError::Adapter {
                browser_id: self.agent.browser_id().to_string(),
                source,
            })?;

        let mut pass = PassState::new(
            loaded.tree(),
            self.retries_left,
            self.events.clone(),
            ledger,
        );

        // the pass settles with its runnables; senders kept alive by
        // contexts moved into spawned tasks are not waited for
        let execution = loaded.run();
        tokio::pin!(execution);
        loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => pass.handle(event),
                    None => {
                        (&mut execution).await;
                        break;
                    }
                },
                _ = &mut execution => break,
            }
        }
        rx.close();
        while let Ok(event) = rx.try_recv() {
            pass.handle(event);
        }

        Ok(pass.to_retry)
    }
}

/// Failure routing for one pass
struct PassState<'a> {
    tree: Arc<SuiteTree>,
    retries_left: u32,
    to_retry: Vec<RunnableRef>,
    ledger: &'a mut UnitLedger,
    events: Option<UnboundedSender<RunnerEvent>>,
}

impl<'a> PassState<'a> {
    fn new(
        tree: Arc<SuiteTree>,
        retries_left: u32,
        events: Option<UnboundedSender<RunnerEvent>>,
        ledger: &'a mut UnitLedger,
    ) -> Self {
        Self {
            tree,
            retries_left,
            to_retry: Vec::new(),
            ledger,
            events,
        }
    }

    fn handle(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::TestFail(failure) => {
                // a test failed by a hook retries the hook's whole suite
                let target = match (&failure.hook, &failure.parent) {
                    (Some(_), Some(parent)) => parent.clone(),
                    _ => failure.runnable.clone(),
                };
                self.on_failure(FailureOrigin::TestFail, failure, target, None);
            }
            RunnerEvent::SuiteFail(failure) => {
                let target = failure
                    .parent
                    .clone()
                    .unwrap_or_else(|| failure.runnable.clone());
                self.on_failure(FailureOrigin::SuiteFail, failure, target, None);
            }
            RunnerEvent::Error(failure) => match failure.parent.clone() {
                Some(parent) if self.retries_left > 0 => {
                    let err = Some(failure.error.clone());
                    self.on_failure(FailureOrigin::Error, failure, parent, err);
                }
                _ => self.forward(RunnerEvent::Error(failure)),
            },
            other => self.forward(other),
        }
    }

    fn on_failure(
        &mut self,
        origin: FailureOrigin,
        failure: Failure,
        target: RunnableRef,
        err: Option<TestError>,
    ) {
        if self.retries_left == 0 {
            let event = match origin {
                FailureOrigin::TestFail => RunnerEvent::TestFail(failure),
                FailureOrigin::SuiteFail => RunnerEvent::SuiteFail(failure),
                FailureOrigin::Error => RunnerEvent::Error(failure),
            };
            self.forward(event);
            return;
        }

        self.add_to_retry(&target);
        self.forward(RunnerEvent::Retry(RetryNotice {
            origin,
            failure,
            retries_left: self.retries_left - 1,
            err,
        }));
    }

    /// Queue a test, or every runnable test nested under a suite
    fn add_to_retry(&mut self, target: &RunnableRef) {
        let tests = match target.kind {
            RunnableKind::Test => vec![target.clone()],
            RunnableKind::Suite | RunnableKind::Hook => match self.tree.find(target) {
                Some(id) => self
                    .tree
                    .descendant_tests(id)
                    .into_iter()
                    .filter(|&t| !self.tree.node(t).is_pending())
                    .map(|t| self.tree.runnable_ref(t))
                    .collect(),
                None => Vec::new(),
            },
        };

        for test in tests {
            if !self.to_retry.iter().any(|r| r.same_identity(&test)) {
                self.to_retry.push(test);
            }
        }
    }

    fn forward(&mut self, event: RunnerEvent) {
        self.ledger.record(&event);
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, FnLoader, TestContext};
    use crate::browser::LocalPool;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Fails the first `fails` calls, then passes; counts every call
    fn flaky(
        fails: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(TestContext) -> futures::future::Ready<Result<(), TestError>> + Send + Sync {
        move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(if n < fails {
                Err(TestError::failure(format!("attempt {}", n + 1)))
            } else {
                Ok(())
            })
        }
    }

    async fn ok(_: TestContext) -> Result<(), TestError> {
        Ok(())
    }

    fn runner(loader: FnLoader, retry: u32) -> (RetryRunner, UnboundedReceiver<RunnerEvent>) {
        runner_in("chrome", Arc::new(LocalPool::new().with_browser("chrome", 1)), loader, retry)
    }

    fn runner_in(
        browser_id: &str,
        pool: Arc<LocalPool>,
        loader: FnLoader,
        retry: u32,
    ) -> (RetryRunner, UnboundedReceiver<RunnerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = RetryRunner::create(
            vec!["a.yaml".to_string()],
            BrowserAgent::new(browser_id, pool),
            Arc::new(loader),
            MochaOpts::default(),
            Arc::new(Value::Null),
            retry,
        )
        .with_events(tx);
        (runner, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<RunnerEvent>) -> Vec<RunnerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count(events: &[RunnerEvent], name: &str) -> usize {
        events.iter().filter(|e| e.name() == name).count()
    }

    fn single_test(calls: Arc<AtomicUsize>, fails: usize) -> FnLoader {
        FnLoader::new().with_file("a.yaml", move |b| {
            let calls = calls.clone();
            b.suite("s", move |s| {
                s.test("t", flaky(fails, calls));
            });
        })
    }

    #[tokio::test]
    async fn test_always_failing_test_retries_budget_times() {
        for retry in 0..4u32 {
            let calls = Arc::new(AtomicUsize::new(0));
            let (mut runner, mut rx) = runner(single_test(calls.clone(), usize::MAX), retry);

            let report = runner.run(Vec::new()).await.unwrap();
            let events = drain(&mut rx);

            assert_eq!(count(&events, "TEST_FAIL"), 1, "retry = {retry}");
            assert_eq!(count(&events, "RETRY"), retry as usize, "retry = {retry}");
            assert_eq!(calls.load(Ordering::SeqCst), retry as usize + 1);
            assert_eq!(report.passes, retry + 1);
            assert_eq!(report.retries_left, 0);

            // the terminal failure comes after every retry notice
            let last_retry = events.iter().rposition(|e| e.name() == "RETRY");
            let fail = events.iter().position(|e| e.name() == "TEST_FAIL");
            assert!(last_retry < fail);
        }
    }

    #[tokio::test]
    async fn test_flaky_test_recovers() {
        for retry in 1..4u32 {
            let calls = Arc::new(AtomicUsize::new(0));
            let (mut runner, mut rx) = runner(single_test(calls, 1), retry);

            let report = runner.run(Vec::new()).await.unwrap();
            let events = drain(&mut rx);

            assert_eq!(count(&events, "TEST_FAIL"), 0);
            assert_eq!(count(&events, "TEST_PASS"), 1);
            assert_eq!(report.retries_left, retry - 1);
            assert!(report.is_success());
        }
    }

    #[tokio::test]
    async fn test_single_retry_scenario() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut runner, mut rx) = runner(single_test(calls, 1), 1);
        runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        let retries: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RunnerEvent::Retry(notice) => Some(notice),
                _ => None,
            })
            .collect();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].retries_left, 0);
        assert_eq!(retries[0].origin, FailureOrigin::TestFail);

        let last_result = events
            .iter()
            .rev()
            .find(|e| matches!(e, RunnerEvent::TestPass(_) | RunnerEvent::TestFail(_)))
            .unwrap();
        assert_eq!(last_result.name(), "TEST_PASS");
    }

    #[tokio::test]
    async fn test_zero_budget_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut runner, mut rx) = runner(single_test(calls.clone(), 1), 0);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(count(&events, "TEST_FAIL"), 1);
        assert_eq!(count(&events, "RETRY"), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_passed_tests_are_not_rerun() {
        let passing = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicUsize::new(0));
        let (p, f) = (passing.clone(), failing.clone());
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let (p, f) = (p.clone(), f.clone());
            b.suite("s", move |s| {
                s.test("stable", flaky(0, p));
                s.test("flaky", flaky(2, f));
            });
        });

        let (mut runner, _rx) = runner(loader, 3);
        let report = runner.run(Vec::new()).await.unwrap();

        assert_eq!(passing.load(Ordering::SeqCst), 1);
        assert_eq!(failing.load(Ordering::SeqCst), 3);
        assert_eq!(report.passes, 3);
        assert_eq!(report.retries_left, 1);
    }

    #[tokio::test]
    async fn test_explicit_filter_restricts_first_pass() {
        let a = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let (ac, bc) = (a.clone(), b_calls.clone());
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let (ac, bc) = (ac.clone(), bc.clone());
            b.suite("s", move |s| {
                s.test("a", flaky(0, ac));
                s.test("b", flaky(0, bc));
            });
        });

        let (mut runner, _rx) = runner(loader, 0);
        runner
            .run(vec![RunnableRef::test("s a", "a.yaml", "chrome")])
            .await
            .unwrap();

        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_budget_is_per_pass_not_per_test() {
        let calls: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let shared = calls.clone();
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let shared = shared.clone();
            b.suite("s", move |s| {
                for (i, c) in shared.iter().enumerate() {
                    s.test(&format!("t{i}"), flaky(1, c.clone()));
                }
            });
        });

        let (mut runner, mut rx) = runner(loader, 2);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        // three failures on pass 1 cost a single retry
        assert_eq!(report.retries_left, 1);
        assert_eq!(report.passes, 2);
        assert_eq!(count(&events, "RETRY"), 3);
        assert_eq!(count(&events, "TEST_PASS"), 3);
    }

    #[tokio::test]
    async fn test_hook_failure_retries_nested_tests() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let nested = Arc::new(AtomicUsize::new(0));
        let sibling = Arc::new(AtomicUsize::new(0));
        let (h, n, sib) = (hook_calls.clone(), nested.clone(), sibling.clone());

        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let (h, n, sib) = (h.clone(), n.clone(), sib.clone());
            b.suite("outer", move |s| {
                s.test("sibling", flaky(0, sib));
                s.suite("inner", move |i| {
                    i.before_all(flaky(1, h));
                    i.test("one", flaky(0, n.clone()));
                    i.suite("deeper", move |d| {
                        d.test("two", flaky(0, n));
                    });
                });
            });
        });

        let (mut runner, mut rx) = runner(loader, 1);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
        // nested tests only ran on the retry pass
        assert_eq!(nested.load(Ordering::SeqCst), 2);
        assert_eq!(sibling.load(Ordering::SeqCst), 1);
        assert_eq!(count(&events, "RETRY"), 2);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_before_each_failure_retries_only_the_test() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let sibling = Arc::new(AtomicUsize::new(0));
        let (h, sib) = (hook_calls.clone(), sibling.clone());

        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let (h, sib) = (h.clone(), sib.clone());
            b.suite("s", move |s| {
                s.test("sibling", flaky(0, sib));
                s.suite("inner", move |i| {
                    // fails for the first test only
                    i.before_each(flaky(1, h));
                    i.test("one", ok);
                    i.test("two", ok);
                });
            });
        });

        let (mut runner, mut rx) = runner(loader, 1);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        let notice = events
            .iter()
            .find_map(|e| match e {
                RunnerEvent::Retry(n) => Some(n),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.failure.runnable.full_title, "s inner one");
        assert_eq!(count(&events, "RETRY"), 1);
        // pass 2 runs "one" alone: two hook calls on pass 1, one on pass 2
        assert_eq!(hook_calls.load(Ordering::SeqCst), 3);
        assert_eq!(sibling.load(Ordering::SeqCst), 1);
        assert_eq!(report.stats.passed, 3);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_after_all_failure_retries_whole_suite() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let tests = Arc::new(AtomicUsize::new(0));
        let (h, t) = (hook_calls.clone(), tests.clone());

        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let (h, t) = (h.clone(), t.clone());
            b.suite("s", move |s| {
                s.after_all(flaky(1, h));
                s.test("one", flaky(0, t.clone()));
                s.test("two", flaky(0, t));
            });
        });

        let (mut runner, mut rx) = runner(loader, 1);
        runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        let notice = events
            .iter()
            .find_map(|e| match e {
                RunnerEvent::Retry(n) => Some(n),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.origin, FailureOrigin::SuiteFail);
        assert_eq!(tests.load(Ordering::SeqCst), 4);
        assert_eq!(count(&events, "SUITE_FAIL"), 0);
    }

    #[tokio::test]
    async fn test_suite_retry_counts_each_test_once() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let h = hook_calls.clone();
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let h = h.clone();
            b.suite("s", move |s| {
                s.after_all(flaky(1, h));
                s.test("one", ok);
                s.test("two", ok);
            });
        });

        let (mut runner, mut rx) = runner(loader, 1);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        // both tests passed twice, but the tree only has two
        assert_eq!(count(&events, "TEST_PASS"), 4);
        assert_eq!(report.stats.passed, 2);
        assert_eq!(report.stats.failed, 0);
        assert_eq!(report.stats.retried, 1);

        let summary = crate::models::RunSummary::new(chrono::Utc::now(), vec![report]);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.pass_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_retried_then_terminal_test_counts_as_failed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut runner, _rx) = runner(single_test(calls, usize::MAX), 2);
        let report = runner.run(Vec::new()).await.unwrap();

        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.passed, 0);
        assert_eq!(report.stats.retried, 2);
    }

    #[tokio::test]
    async fn test_pass_settles_without_detached_contexts() {
        let loader = FnLoader::new().with_file("a.yaml", |b| {
            b.suite("s", |s| {
                s.test("spawns", |ctx: TestContext| async move {
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                        ctx.info("too late");
                    });
                    Ok::<(), TestError>(())
                });
            });
        });

        let (mut runner, mut rx) = runner(loader, 0);
        let report = tokio::time::timeout(std::time::Duration::from_secs(2), runner.run(Vec::new()))
            .await
            .expect("pass did not settle")
            .unwrap();
        let events = drain(&mut rx);

        assert_eq!(report.stats.passed, 1);
        assert_eq!(count(&events, "TEST_PASS"), 1);
        assert_eq!(count(&events, "SUITE_END"), 1);
    }

    #[tokio::test]
    async fn test_uncaught_error_retried_with_err() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let c = c.clone();
            b.suite("s", move |s| {
                s.test("t", move |_: TestContext| {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    futures::future::ready(if n == 0 {
                        Err(TestError::uncaught("session lost"))
                    } else {
                        Ok(())
                    })
                });
            });
        });

        let (mut runner, mut rx) = runner(loader, 1);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        let notice = events
            .iter()
            .find_map(|e| match e {
                RunnerEvent::Retry(n) => Some(n),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.origin, FailureOrigin::Error);
        assert_eq!(notice.err.as_ref().unwrap().message, "session lost");
        assert_eq!(count(&events, "ERROR"), 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_unattributed_error_never_retried() {
        // no sessions configured for the browser: acquisition fails
        let loader = FnLoader::new().with_file("a.yaml", |b| {
            b.suite("s", |s| {
                s.test("t", ok);
            });
        });

        let (mut runner, mut rx) = runner_in("safari", Arc::new(LocalPool::new()), loader, 3);
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(count(&events, "ERROR"), 1);
        assert_eq!(count(&events, "RETRY"), 0);
        assert_eq!(report.retries_left, 3);
        assert_eq!(report.passes, 1);
    }

    #[tokio::test]
    async fn test_duplicate_titles_fail_construction() {
        let loader = FnLoader::new().with_file("a.yaml", |b| {
            b.suite("s", |s| {
                s.test("t", ok);
                s.test("t", ok);
            });
        });

        let (mut runner, _rx) = runner(loader, 2);
        let err = runner.run(Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Adapter {
                source: AdapterError::DuplicateTitle { .. },
                ..
            }
        ));
        assert_eq!(runner.retries_left(), 2);
    }

    #[tokio::test]
    async fn test_title_validation_only_on_first_pass() {
        // a loader that grows a duplicate once the tree is rebuilt
        let loads = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (l, c) = (loads.clone(), calls.clone());
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let pass = l.fetch_add(1, Ordering::SeqCst);
            let c = c.clone();
            b.suite("s", move |s| {
                s.test("t", flaky(1, c));
                if pass > 0 {
                    s.test("t", ok);
                }
            });
        });

        let (mut runner, _rx) = runner(loader, 1);
        let report = runner.run(Vec::new()).await.unwrap();
        assert_eq!(report.passes, 2);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_skip_applied_on_first_pass() {
        let skipped = Arc::new(AtomicUsize::new(0));
        let s_calls = skipped.clone();
        let loader = FnLoader::new().with_file("a.yaml", move |b| {
            let s_calls = s_calls.clone();
            b.suite("s", move |s| {
                s.test("clipboard", flaky(0, s_calls));
                s.test("other", ok);
            });
        });

        let skipper = TestSkipper::new(&[crate::skip::SkipRule {
            browser: "chrome".to_string(),
            title: Some("clipboard".to_string()),
            reason: None,
        }])
        .unwrap();

        let (runner, mut rx) = runner(loader, 0);
        let mut runner = runner.with_skipper(Arc::new(skipper));
        let report = runner.run(Vec::new()).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(skipped.load(Ordering::SeqCst), 0);
        assert_eq!(count(&events, "TEST_PENDING"), 1);
        assert_eq!(report.stats.pending, 1);
    }

    #[tokio::test]
    async fn test_events_keep_unit_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut runner, mut rx) = runner(single_test(calls, 1), 1);
        runner.run(Vec::new()).await.unwrap();
        let names: Vec<_> = drain(&mut rx).iter().map(|e| e.name()).collect();

        assert_eq!(
            names,
            vec![
                "BEFORE_FILE_READ",
                "AFTER_FILE_READ",
                "SUITE_BEGIN",
                "TEST_BEGIN",
                "RETRY",
                "TEST_END",
                "SUITE_END",
                "BEFORE_FILE_READ",
                "AFTER_FILE_READ",
                "SUITE_BEGIN",
                "TEST_BEGIN",
                "TEST_PASS",
                "TEST_END",
                "SUITE_END",
            ]
        );
    }

    #[tokio::test]
    async fn test_release_failure_is_not_fatal() {
        use crate::browser::{BrowserPool, PoolError, Session, SessionInfo};
        use async_trait::async_trait;

        struct BrokenRelease {
            released: Mutex<HashMap<u64, bool>>,
        }

        #[async_trait]
        impl BrowserPool for BrokenRelease {
            async fn acquire(&self, browser_id: &str) -> Result<Session, PoolError> {
                Ok(Session::new(
                    SessionInfo {
                        id: 7,
                        browser_id: browser_id.to_string(),
                        started_at: chrono::Utc::now(),
                    },
                    None,
                ))
            }

            async fn release(&self, session: Session) -> Result<(), PoolError> {
                self.released.lock().unwrap().insert(session.id(), true);
                Err(PoolError::Release {
                    id: session.id(),
                    browser_id: session.browser_id().to_string(),
                    reason: "driver gone".to_string(),
                })
            }
        }

        let pool = Arc::new(BrokenRelease {
            released: Mutex::new(HashMap::new()),
        });
        let loader = FnLoader::new().with_file("a.yaml", |b| {
            b.suite("s", |s| {
                s.test("t", ok);
            });
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = RetryRunner::create(
            vec!["a.yaml".to_string()],
            BrowserAgent::new("chrome", pool.clone()),
            Arc::new(loader),
            MochaOpts::default(),
            Arc::new(Value::Null),
            1,
        )
        .with_events(tx);

        let report = runner.run(Vec::new()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.passes, 1);
        assert_eq!(pool.released.lock().unwrap().get(&7), Some(&true));
        assert_eq!(count(&drain(&mut rx), "TEST_PASS"), 1);
    }
}
