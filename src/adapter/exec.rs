//! Tree execution
//!
//! Runs a loaded tree inside one browser session: hooks and tests strictly
//! in sequence, one event per settled runnable.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::tree::{NodeId, SuiteTree, TestContext};
use crate::browser::{BrowserAgent, SessionInfo};
use crate::config::MochaOpts;
use crate::models::{
    Failure, HookKind, Notice, PendingTest, RunnableRef, RunnerEvent, TestError, TestReport,
};
use crate::utils::Timer;

pub(super) struct Execution {
    pub tree: Arc<SuiteTree>,
    pub agent: BrowserAgent,
    pub opts: MochaOpts,
    pub ctx: Arc<Value>,
    pub emitter: Option<UnboundedSender<RunnerEvent>>,
    pub session: Option<SessionInfo>,
}

impl Execution {
    /// Acquire a session, run the whole tree, release the session
    pub async fn run(mut self) {
        let root = self.tree.root();
        if self.tree.tests().is_empty() {
            return;
        }

        if !self.tree.has_runnable_tests(root) {
            self.run_suite(root).await;
            return;
        }

        let session = match self.agent.acquire().await {
            Ok(session) => session,
            Err(e) => {
                let error = TestError::uncaught(format!(
                    "Could not acquire browser {}: {}",
                    self.agent.browser_id(),
                    e
                ));
                self.emit(RunnerEvent::Error(Failure::new(
                    error,
                    self.tree.runnable_ref(root),
                )));
                return;
            }
        };
        self.session = Some(session.info().clone());

        self.run_suite(root).await;

        if let Err(e) = self.agent.release(session).await {
            warn!("Failed to free browser {}: {}", self.agent.browser_id(), e);
            self.emit(RunnerEvent::Warning(Notice {
                browser_id: self.agent.browser_id().to_string(),
                message: format!("Failed to free browser: {e}"),
            }));
        }
    }

    fn emit(&self, event: RunnerEvent) {
        if let Some(tx) = &self.emitter {
            if tx.send(event).is_err() {
                debug!("Event receiver for {} dropped", self.agent.browser_id());
            }
        }
    }

    fn run_suite(&self, suite: NodeId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let tree = &self.tree;
            let node = tree.node(suite);
            if tree.descendant_tests(suite).is_empty() {
                return;
            }

            let is_root = node.parent.is_none();
            let suite_ref = tree.runnable_ref(suite);
            if !is_root {
                self.emit(RunnerEvent::SuiteBegin(suite_ref.clone()));
            }

            let runnable = tree.has_runnable_tests(suite);
            let mut before_all_failure = None;
            if runnable {
                for hook in tree.hooks_of(suite, HookKind::BeforeAll) {
                    if let Err(e) = self.call(hook).await {
                        before_all_failure = Some((hook, e));
                        break;
                    }
                }
            }

            match before_all_failure {
                Some((hook, error)) => self.fail_suite_tests(suite, hook, error),
                None => {
                    for &test in &node.tests {
                        self.run_test(test).await;
                    }
                    for &child in &node.suites {
                        self.run_suite(child).await;
                    }
                }
            }

            if runnable {
                for hook in tree.hooks_of(suite, HookKind::AfterAll) {
                    if let Err(e) = self.call(hook).await {
                        self.emit(RunnerEvent::SuiteFail(
                            Failure::new(e, tree.runnable_ref(hook)).with_parent(suite_ref.clone()),
                        ));
                    }
                }
            }

            if !is_root {
                self.emit(RunnerEvent::SuiteEnd(suite_ref));
            }
        })
    }

    /// Report every nested test as failed by a `before all` hook
    fn fail_suite_tests(&self, suite: NodeId, hook: NodeId, error: TestError) {
        let tree = &self.tree;
        let hook_ref = tree.runnable_ref(hook);
        let suite_ref = tree.runnable_ref(suite);

        for test in tree.descendant_tests(suite) {
            let test_ref = tree.runnable_ref(test);
            if let Some(reason) = &tree.node(test).pending {
                self.emit(RunnerEvent::TestPending(PendingTest {
                    runnable: test_ref,
                    reason: reason.clone(),
                }));
                continue;
            }
            self.emit(RunnerEvent::TestFail(
                Failure::new(error.clone(), test_ref)
                    .with_hook(hook_ref.clone())
                    .with_parent(suite_ref.clone()),
            ));
        }
    }

    async fn run_test(&self, test: NodeId) {
        let tree = &self.tree;
        let test_ref = tree.runnable_ref(test);
        let parent_ref = tree
            .parent_ref(test)
            .unwrap_or_else(|| tree.runnable_ref(tree.root()));

        if let Some(reason) = &tree.node(test).pending {
            self.emit(RunnerEvent::TestPending(PendingTest {
                runnable: test_ref,
                reason: reason.clone(),
            }));
            return;
        }

        self.emit(RunnerEvent::TestBegin(test_ref.clone()));
        let timer = Timer::start(test_ref.full_title.clone());
        let ancestors = tree.ancestors(test);

        let mut outcome = Ok(());
        'before_each: for &suite in &ancestors {
            for hook in tree.hooks_of(suite, HookKind::BeforeEach) {
                if let Err(e) = self.call(hook).await {
                    outcome = Err(e);
                    break 'before_each;
                }
            }
        }
        if outcome.is_ok() {
            outcome = self.call(test).await;
        }
        let duration_ms = timer.elapsed_ms();

        match outcome {
            Ok(()) => self.emit(RunnerEvent::TestPass(TestReport {
                runnable: test_ref.clone(),
                duration_ms,
                slow: self.opts.slow_ms > 0 && duration_ms >= self.opts.slow_ms,
            })),
            Err(e) if e.is_uncaught() => self.emit(RunnerEvent::Error(
                Failure::new(e, test_ref.clone()).with_parent(parent_ref),
            )),
            Err(e) => self.emit(RunnerEvent::TestFail(
                Failure::new(e, test_ref.clone()).with_parent(parent_ref),
            )),
        }

        for &suite in ancestors.iter().rev() {
            for hook in tree.hooks_of(suite, HookKind::AfterEach) {
                if let Err(e) = self.call(hook).await {
                    self.emit(RunnerEvent::SuiteFail(
                        Failure::new(e, tree.runnable_ref(hook))
                            .with_parent(tree.runnable_ref(suite)),
                    ));
                }
            }
        }

        self.emit(RunnerEvent::TestEnd(test_ref));
    }

    /// Run one body under the configured timeout
    async fn call(&self, id: NodeId) -> Result<(), TestError> {
        let Some(body) = self.tree.node(id).body.clone() else {
            return Ok(());
        };

        let runnable: RunnableRef = self.tree.runnable_ref(id);
        let ctx = TestContext {
            browser_id: self.agent.browser_id().to_string(),
            session: self.session.clone(),
            ctx: self.ctx.clone(),
            runnable,
            emitter: self.emitter.clone(),
        };

        let guarded = AssertUnwindSafe(body.call(ctx)).catch_unwind();
        let settled = if self.opts.timeout_ms == 0 {
            guarded.await
        } else {
            match tokio::time::timeout(Duration::from_millis(self.opts.timeout_ms), guarded).await
            {
                Ok(settled) => settled,
                Err(_) => return Err(TestError::timeout(self.opts.timeout_ms)),
            }
        };

        settled.unwrap_or_else(|_| Err(TestError::uncaught("runnable panicked")))
    }
}
