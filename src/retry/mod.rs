//! Retry support
//!
//! Structural identity matching used to restrict retry passes.

mod matcher;

pub use matcher::{Matcher, MatcherSet};
