//! Suite tree snapshot
//!
//! Every pass builds a fresh arena of suites, tests and hooks. Nodes are
//! addressed by index for the lifetime of one pass only; identity across
//! passes goes through [`RunnableRef`].

use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::browser::SessionInfo;
use crate::models::{HookKind, Notice, RunnableKind, RunnableRef, RunnerEvent, TestError};

/// Index of a node in a [`SuiteTree`]
pub type NodeId = usize;

/// Everything a test or hook body can see while it runs
#[derive(Clone, Debug)]
pub struct TestContext {
    pub browser_id: String,
    pub session: Option<SessionInfo>,
    /// Shared per-unit context from configuration
    pub ctx: Arc<Value>,
    pub runnable: RunnableRef,
    pub(crate) emitter: Option<UnboundedSender<RunnerEvent>>,
}

impl TestContext {
    pub fn new(browser_id: impl Into<String>, ctx: Arc<Value>, runnable: RunnableRef) -> Self {
        Self {
            browser_id: browser_id.into(),
            session: None,
            ctx,
            runnable,
            emitter: None,
        }
    }

    /// Report an `INFO` event
    pub fn info(&self, message: impl Into<String>) {
        self.notify(message.into(), false);
    }

    /// Report a `WARNING` event
    pub fn warn(&self, message: impl Into<String>) {
        self.notify(message.into(), true);
    }

    fn notify(&self, message: String, warning: bool) {
        let Some(tx) = &self.emitter else {
            return;
        };
        let notice = Notice {
            browser_id: self.browser_id.clone(),
            message,
        };
        let event = if warning {
            RunnerEvent::Warning(notice)
        } else {
            RunnerEvent::Info(notice)
        };
        let _ = tx.send(event);
    }
}

/// Executable body of a test or hook
pub trait TestFn: Send + Sync {
    fn call(&self, ctx: TestContext) -> BoxFuture<'static, Result<(), TestError>>;
}

impl<F, Fut> TestFn for F
where
    F: Fn(TestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TestError>> + Send + 'static,
{
    fn call(&self, ctx: TestContext) -> BoxFuture<'static, Result<(), TestError>> {
        Box::pin(self(ctx))
    }
}

pub type Body = Arc<dyn TestFn>;

/// Node of the arena
#[derive(Clone)]
pub struct Node {
    pub kind: RunnableKind,
    pub title: String,
    pub full_title: String,
    pub file: String,
    pub parent: Option<NodeId>,
    pub hook: Option<HookKind>,
    /// Skip reason; `Some(None)` is skipped without a reason
    pub pending: Option<Option<String>>,
    pub tests: Vec<NodeId>,
    pub suites: Vec<NodeId>,
    pub hooks: Vec<NodeId>,
    pub(crate) body: Option<Body>,
}

impl Node {
    fn new(kind: RunnableKind, title: &str, full_title: String, file: &str) -> Self {
        Self {
            kind,
            title: title.to_string(),
            full_title,
            file: file.to_string(),
            parent: None,
            hook: None,
            pending: None,
            tests: Vec::new(),
            suites: Vec::new(),
            hooks: Vec::new(),
            body: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("full_title", &self.full_title)
            .field("file", &self.file)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Arena snapshot of one pass
#[derive(Clone, Debug)]
pub struct SuiteTree {
    browser_id: String,
    nodes: Vec<Node>,
}

impl SuiteTree {
    pub fn new(browser_id: impl Into<String>) -> Self {
        Self {
            browser_id: browser_id.into(),
            nodes: vec![Node::new(RunnableKind::Suite, "", String::new(), "")],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn browser_id(&self) -> &str {
        &self.browser_id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn runnable_ref(&self, id: NodeId) -> RunnableRef {
        let node = &self.nodes[id];
        RunnableRef::new(
            node.kind,
            node.title.clone(),
            node.full_title.clone(),
            node.file.clone(),
            self.browser_id.clone(),
        )
    }

    /// Suite owning a node, the node itself for the root
    pub fn parent_ref(&self, id: NodeId) -> Option<RunnableRef> {
        self.nodes[id].parent.map(|p| self.runnable_ref(p))
    }

    fn push(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = self.nodes.len();
        node.parent = Some(parent);
        let kind = node.kind;
        self.nodes.push(node);

        let parent = &mut self.nodes[parent];
        match kind {
            RunnableKind::Test => parent.tests.push(id),
            RunnableKind::Suite => parent.suites.push(id),
            RunnableKind::Hook => parent.hooks.push(id),
        }
        id
    }

    fn child_full_title(&self, parent: NodeId, title: &str) -> String {
        let prefix = &self.nodes[parent].full_title;
        if prefix.is_empty() {
            title.to_string()
        } else {
            format!("{prefix} {title}")
        }
    }

    /// Attached suites in depth-first order, the root included
    pub fn suites(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].suites.iter().rev());
        }
        out
    }

    /// Attached tests under a suite, own tests before nested suites
    pub fn descendant_tests(&self, suite: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[suite];
        let mut out = node.tests.clone();
        for &child in &node.suites {
            out.extend(self.descendant_tests(child));
        }
        out
    }

    /// Every attached test of the tree
    pub fn tests(&self) -> Vec<NodeId> {
        self.descendant_tests(self.root())
    }

    pub fn hooks_of(&self, suite: NodeId, kind: HookKind) -> Vec<NodeId> {
        self.nodes[suite]
            .hooks
            .iter()
            .copied()
            .filter(|&h| self.nodes[h].hook == Some(kind))
            .collect()
    }

    /// Suites from the root down to the node's parent
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.nodes[id].parent;
        while let Some(p) = current {
            chain.push(p);
            current = self.nodes[p].parent;
        }
        chain.reverse();
        chain
    }

    /// Whether the suite holds at least one test that will execute
    pub fn has_runnable_tests(&self, suite: NodeId) -> bool {
        self.descendant_tests(suite)
            .iter()
            .any(|&t| !self.nodes[t].is_pending())
    }

    /// Attached node matching a structural reference
    pub fn find(&self, runnable: &RunnableRef) -> Option<NodeId> {
        if runnable.browser_id != self.browser_id {
            return None;
        }
        self.suites().into_iter().find_map(|suite| {
            let node = &self.nodes[suite];
            std::iter::once(suite)
                .chain(node.tests.iter().copied())
                .chain(node.hooks.iter().copied())
                .find(|&id| {
                    let n = &self.nodes[id];
                    n.kind == runnable.kind
                        && n.file == runnable.file
                        && n.full_title == runnable.full_title
                })
        })
    }

    /// Mark a test, or every test of a suite, as pending
    pub fn mark_pending(&mut self, id: NodeId, reason: Option<String>) {
        if self.nodes[id].kind == RunnableKind::Suite {
            for test in self.descendant_tests(id) {
                if self.nodes[test].pending.is_none() {
                    self.nodes[test].pending = Some(reason.clone());
                }
            }
        }
        self.nodes[id].pending = Some(reason);
    }

    /// Detach tests rejected by the predicate
    pub fn retain_tests(&mut self, mut keep: impl FnMut(&RunnableRef) -> bool) {
        for suite in self.suites() {
            let tests = std::mem::take(&mut self.nodes[suite].tests);
            let kept: Vec<NodeId> = tests
                .into_iter()
                .filter(|&t| keep(&self.runnable_ref(t)))
                .collect();
            self.nodes[suite].tests = kept;
        }
    }

    /// Indented listing of suites and tests
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_suite(self.root(), 0, &mut out);
        out
    }

    fn render_suite(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let child_depth = if node.parent.is_some() {
            out.push_str(&format!(
                "{}{}{}\n",
                "  ".repeat(depth),
                node.title,
                pending_suffix(node)
            ));
            depth + 1
        } else {
            depth
        };

        for &test in &node.tests {
            let t = &self.nodes[test];
            out.push_str(&format!(
                "{}- {}{}\n",
                "  ".repeat(child_depth),
                t.title,
                pending_suffix(t)
            ));
        }
        for &suite in &node.suites {
            self.render_suite(suite, child_depth, out);
        }
    }
}

fn pending_suffix(node: &Node) -> String {
    match &node.pending {
        Some(Some(reason)) => format!(" (skipped: {reason})"),
        Some(None) => " (skipped)".to_string(),
        None => String::new(),
    }
}

/// Declarative construction of one file's suites
pub struct SuiteBuilder<'a> {
    tree: &'a mut SuiteTree,
    suite: NodeId,
    file: String,
}

impl<'a> SuiteBuilder<'a> {
    pub fn new(tree: &'a mut SuiteTree, file: impl Into<String>) -> Self {
        let suite = tree.root();
        Self {
            tree,
            suite,
            file: file.into(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Nested suite
    pub fn suite(&mut self, title: &str, define: impl FnOnce(&mut SuiteBuilder<'_>)) -> &mut Self {
        let full_title = self.tree.child_full_title(self.suite, title);
        let id = self.tree.push(
            self.suite,
            Node::new(RunnableKind::Suite, title, full_title, &self.file),
        );

        let mut nested = SuiteBuilder {
            tree: &mut *self.tree,
            suite: id,
            file: self.file.clone(),
        };
        define(&mut nested);
        self
    }

    /// Skip the current suite
    pub fn skip(&mut self, reason: Option<String>) -> &mut Self {
        self.tree.nodes[self.suite].pending = Some(reason);
        self
    }

    pub fn test(&mut self, title: &str, body: impl TestFn + 'static) -> &mut Self {
        self.push_test(title, Some(Arc::new(body)), None);
        self
    }

    pub fn test_pending(&mut self, title: &str, reason: Option<String>) -> &mut Self {
        self.push_test(title, None, Some(reason));
        self
    }

    fn push_test(&mut self, title: &str, body: Option<Body>, pending: Option<Option<String>>) {
        let full_title = self.tree.child_full_title(self.suite, title);
        let mut node = Node::new(RunnableKind::Test, title, full_title, &self.file);
        node.body = body;
        node.pending = pending;
        self.tree.push(self.suite, node);
    }

    pub fn hook(&mut self, kind: HookKind, body: impl TestFn + 'static) -> &mut Self {
        let title = kind.title();
        let full_title = self.tree.child_full_title(self.suite, title);
        let mut node = Node::new(RunnableKind::Hook, title, full_title, &self.file);
        node.hook = Some(kind);
        node.body = Some(Arc::new(body));
        self.tree.push(self.suite, node);
        self
    }

    pub fn before_all(&mut self, body: impl TestFn + 'static) -> &mut Self {
        self.hook(HookKind::BeforeAll, body)
    }

    pub fn before_each(&mut self, body: impl TestFn + 'static) -> &mut Self {
        self.hook(HookKind::BeforeEach, body)
    }

    pub fn after_each(&mut self, body: impl TestFn + 'static) -> &mut Self {
        self.hook(HookKind::AfterEach, body)
    }

    pub fn after_all(&mut self, body: impl TestFn + 'static) -> &mut Self {
        self.hook(HookKind::AfterAll, body)
    }

    /// Close the pending suite marks over nested tests
    pub(crate) fn finish(tree: &mut SuiteTree) {
        for suite in tree.suites() {
            if let Some(reason) = tree.nodes[suite].pending.clone() {
                tree.mark_pending(suite, reason);
            }
        }
    }
}
