//! Structural runnable matching
//!
//! Trees are rebuilt on every pass, so a runnable from a previous pass is
//! recognised by `(browser, file, full title)` rather than by node identity.

use crate::models::RunnableRef;

/// Predicate bound to one runnable execution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matcher {
    browser_id: String,
    file: String,
    full_title: String,
}

impl Matcher {
    pub fn new(runnable: &RunnableRef) -> Self {
        Self {
            browser_id: runnable.browser_id.clone(),
            file: runnable.file.clone(),
            full_title: runnable.full_title.clone(),
        }
    }

    pub fn matches(&self, candidate: &RunnableRef, browser_id: &str) -> bool {
        browser_id == self.browser_id
            && candidate.file == self.file
            && candidate.full_title == self.full_title
    }
}

/// Inclusion filter over many matchers
///
/// An empty set accepts every candidate.
#[derive(Clone, Debug, Default)]
pub struct MatcherSet {
    matchers: Vec<Matcher>,
}

impl MatcherSet {
    pub fn new(runnables: &[RunnableRef]) -> Self {
        Self {
            matchers: runnables.iter().map(Matcher::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn accepts(&self, candidate: &RunnableRef, browser_id: &str) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|m| m.matches(candidate, browser_id))
    }
}
