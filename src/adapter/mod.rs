//! Test-definition adapter
//!
//! Builds a suite tree from suite paths, narrows it with an inclusion filter
//! and executes it inside one browser session, reporting everything as
//! [`RunnerEvent`] values.

mod exec;
mod loader;
mod titles;
mod tree;

pub use loader::{collect_suite_files, FnLoader, Step, SuiteLoader, YamlLoader};
pub use titles::TitleRegistry;
pub use tree::{Body, Node, NodeId, SuiteBuilder, SuiteTree, TestContext, TestFn};

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::browser::BrowserAgent;
use crate::config::MochaOpts;
use crate::models::{FileEvent, RunnableRef, RunnerEvent};
use crate::skip::TestSkipper;
use exec::Execution;

/// Errors raised while building a tree
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("No suite registered for {0}")]
    NotFound(String),

    #[error("Tests with the same title: '{title}' are found in file: '{file}' and file: '{other}'")]
    DuplicateTitle {
        title: String,
        file: String,
        other: String,
    },
}

type Filter = Arc<dyn Fn(&RunnableRef, &str) -> bool + Send + Sync>;

/// One adapter session, configured for a single pass
pub struct Adapter {
    opts: MochaOpts,
    agent: BrowserAgent,
    ctx: Arc<Value>,
    loader: Arc<dyn SuiteLoader>,
    filter: Option<Filter>,
    titles: Option<TitleRegistry>,
    skipper: Option<Arc<TestSkipper>>,
    emitter: Option<UnboundedSender<RunnerEvent>>,
}

impl Adapter {
    pub fn create(
        opts: MochaOpts,
        agent: BrowserAgent,
        ctx: Arc<Value>,
        loader: Arc<dyn SuiteLoader>,
    ) -> Self {
        Self {
            opts,
            agent,
            ctx,
            loader,
            filter: None,
            titles: None,
            skipper: None,
            emitter: None,
        }
    }

    /// Inclusion filter evaluated for every test before execution
    pub fn attach_test_filter(
        mut self,
        filter: impl Fn(&RunnableRef, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Reject duplicate full titles across the loaded files
    pub fn attach_title_validator(mut self, titles: TitleRegistry) -> Self {
        self.titles = Some(titles);
        self
    }

    pub fn apply_skip(mut self, skipper: Arc<TestSkipper>) -> Self {
        self.skipper = Some(skipper);
        self
    }

    pub fn attach_emit_fn(mut self, tx: UnboundedSender<RunnerEvent>) -> Self {
        self.emitter = Some(tx);
        self
    }

    fn emit(&self, event: RunnerEvent) {
        if let Some(tx) = &self.emitter {
            let _ = tx.send(event);
        }
    }

    /// Build the tree for the given paths
    pub fn add_files(mut self, paths: &[String]) -> Result<LoadedSuite, AdapterError> {
        let browser_id = self.agent.browser_id().to_string();
        let mut tree = SuiteTree::new(browser_id.as_str());

        for path in paths {
            let file_event = FileEvent {
                file: path.clone(),
                browser_id: browser_id.clone(),
            };
            self.emit(RunnerEvent::BeforeFileRead(file_event.clone()));
            self.loader
                .load(path, &mut SuiteBuilder::new(&mut tree, path.as_str()))?;
            self.emit(RunnerEvent::AfterFileRead(file_event));
        }
        SuiteBuilder::finish(&mut tree);

        if let Some(skipper) = &self.skipper {
            skipper.apply(&mut tree);
        }

        if let Some(mut titles) = self.titles.take() {
            for test in tree.tests() {
                let node = tree.node(test);
                titles.register(&node.full_title, &node.file)?;
            }
        }

        if let Some(filter) = &self.filter {
            let before = tree.tests().len();
            tree.retain_tests(|r| filter(r, &browser_id));
            debug!(
                "[{}] filter kept {} of {} tests",
                browser_id,
                tree.tests().len(),
                before
            );
        }

        Ok(LoadedSuite {
            tree: Arc::new(tree),
            opts: self.opts,
            agent: self.agent,
            ctx: self.ctx,
            emitter: self.emitter,
        })
    }
}

/// Tree ready to be executed
pub struct LoadedSuite {
    tree: Arc<SuiteTree>,
    opts: MochaOpts,
    agent: BrowserAgent,
    ctx: Arc<Value>,
    emitter: Option<UnboundedSender<RunnerEvent>>,
}

impl LoadedSuite {
    pub fn tree(&self) -> Arc<SuiteTree> {
        self.tree.clone()
    }

    pub fn into_tree(self) -> SuiteTree {
        Arc::try_unwrap(self.tree).unwrap_or_else(|shared| (*shared).clone())
    }

    /// Execute the tree; settles once every runnable has reported
    pub async fn run(self) {
        Execution {
            tree: self.tree,
            agent: self.agent,
            opts: self.opts,
            ctx: self.ctx,
            emitter: self.emitter,
            session: None,
        }
        .run()
        .await
    }
}
