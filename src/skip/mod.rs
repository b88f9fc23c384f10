//! Skip rules
//!
//! Rules from configuration mark tests pending for matching browsers. They
//! are applied once per execution unit, before its first pass.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::SuiteTree;

/// Configured skip rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRule {
    /// Browser id pattern, matched against the whole id
    pub browser: String,

    /// Full title pattern; every test of the browser when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SkipRule {
    pub fn compile(&self) -> Result<CompiledRule, regex::Error> {
        let browser = Regex::new(&format!("^(?:{})$", self.browser))?;
        let title = self.title.as_deref().map(Regex::new).transpose()?;

        Ok(CompiledRule {
            browser,
            title,
            reason: self.reason.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CompiledRule {
    browser: Regex,
    title: Option<Regex>,
    reason: Option<String>,
}

impl CompiledRule {
    fn applies_to(&self, browser_id: &str) -> bool {
        self.browser.is_match(browser_id)
    }

    fn matches_title(&self, full_title: &str) -> bool {
        self.title.as_ref().map_or(true, |re| re.is_match(full_title))
    }
}

/// Evaluates skip rules against a freshly built tree
#[derive(Clone, Debug, Default)]
pub struct TestSkipper {
    rules: Vec<CompiledRule>,
}

impl TestSkipper {
    pub fn new(rules: &[SkipRule]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(SkipRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Mark matching suites and tests of the tree as pending
    pub fn apply(&self, tree: &mut SuiteTree) {
        let browser_id = tree.browser_id().to_string();
        let rules: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(&browser_id))
            .collect();
        if rules.is_empty() {
            return;
        }

        let root = tree.root();
        let candidates: Vec<_> = tree
            .suites()
            .into_iter()
            .filter(|&s| s != root)
            .chain(tree.tests())
            .collect();

        let mut skipped = 0;
        for id in candidates {
            let node = tree.node(id);
            if node.is_pending() {
                continue;
            }
            if let Some(rule) = rules.iter().find(|r| r.matches_title(&node.full_title)) {
                let reason = rule.reason.clone();
                tree.mark_pending(id, reason);
                skipped += 1;
            }
        }

        if skipped > 0 {
            debug!("[{}] skip rules marked {} runnables pending", browser_id, skipped);
        }
    }
}
