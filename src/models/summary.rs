//! Run summary models
//!
//! Per-unit settle reports and the aggregate across units and browsers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::event::RunnerEvent;
use super::runnable::RunnableRef;

/// Counters of one unit, or of a whole run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub retried: usize,
    pub errors: usize,
}

impl UnitStats {
    pub fn merge(&mut self, other: &UnitStats) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.pending += other.pending;
        self.retried += other.retried;
        self.errors += other.errors;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Passed,
    Failed,
    Pending,
}

/// Latest outcome of every runnable a unit reported
///
/// Suite-level retries re-run tests that already passed; keying by
/// `(browser_id, file, full_title)` counts each of them once.
#[derive(Debug, Default)]
pub struct UnitLedger {
    outcomes: HashMap<(String, String, String), Outcome>,
    retried: usize,
    errors: usize,
}

impl UnitLedger {
    /// Account for one outbound event
    pub fn record(&mut self, event: &RunnerEvent) {
        match event {
            RunnerEvent::TestPass(report) => self.settle(&report.runnable, Outcome::Passed),
            RunnerEvent::TestPending(pending) => self.settle(&pending.runnable, Outcome::Pending),
            RunnerEvent::TestFail(failure) | RunnerEvent::SuiteFail(failure) => {
                self.settle(&failure.runnable, Outcome::Failed)
            }
            RunnerEvent::Error(_) => self.errors += 1,
            RunnerEvent::Retry(_) => self.retried += 1,
            _ => {}
        }
    }

    fn settle(&mut self, runnable: &RunnableRef, outcome: Outcome) {
        let key = (
            runnable.browser_id.clone(),
            runnable.file.clone(),
            runnable.full_title.clone(),
        );
        self.outcomes.insert(key, outcome);
    }

    pub fn stats(&self) -> UnitStats {
        let count = |wanted| self.outcomes.values().filter(|&&o| o == wanted).count();
        UnitStats {
            passed: count(Outcome::Passed),
            failed: count(Outcome::Failed),
            pending: count(Outcome::Pending),
            retried: self.retried,
            errors: self.errors,
        }
    }
}

/// Report of one settled execution unit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitReport {
    pub browser_id: String,
    pub paths: Vec<String>,
    /// Number of passes executed, first pass included
    pub passes: u32,
    /// Retry budget left when the unit settled
    pub retries_left: u32,
    pub stats: UnitStats,
    pub duration_ms: u64,
}

impl UnitReport {
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0 && self.stats.errors == 0
    }
}

impl fmt::Display for UnitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.is_success() { "✓" } else { "✗" };
        write!(
            f,
            "{} [{}] {} - {} passes, {} retries left [{}ms]",
            symbol,
            self.browser_id,
            self.paths.join(", "),
            self.passes,
            self.retries_left,
            self.duration_ms
        )
    }
}

/// Aggregate over every unit of a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub stats: UnitStats,
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>, units: Vec<UnitReport>) -> Self {
        let mut stats = UnitStats::default();
        for unit in &units {
            stats.merge(&unit.stats);
        }
        let total_duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;

        Self {
            started_at,
            total_duration_ms,
            stats,
            units,
        }
    }

    /// Combine summaries of concurrently run browsers
    pub fn combine(started_at: DateTime<Utc>, summaries: Vec<RunSummary>) -> Self {
        let units = summaries.into_iter().flat_map(|s| s.units).collect();
        Self::new(started_at, units)
    }

    pub fn total(&self) -> usize {
        self.stats.passed + self.stats.failed + self.stats.pending
    }

    pub fn is_success(&self) -> bool {
        self.units.iter().all(UnitReport::is_success)
    }

    pub fn pass_rate(&self) -> f64 {
        let executed = self.stats.passed + self.stats.failed;
        if executed == 0 {
            0.0
        } else {
            (self.stats.passed as f64 / executed as f64) * 100.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run started {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for unit in &self.units {
            writeln!(f, "  {unit}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Pending: {} | Retries: {} | Errors: {}",
            self.total(),
            self.stats.passed,
            self.stats.failed,
            self.stats.pending,
            self.stats.retried,
            self.stats.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}
