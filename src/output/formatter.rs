//! Event and summary formatters
//!
//! Flat human-readable lines or JSON lines.

use std::io::Write;

use crate::adapter::SuiteTree;
use crate::models::{FailureOrigin, RunSummary, RunnerEvent};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Flat,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "flat" | "plain" => Some(OutputFormat::Flat),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Formatter for the merged event stream
pub struct EventFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl EventFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    /// Format one event; `None` for events the flat output leaves out
    pub fn format_event(&self, event: &RunnerEvent) -> Option<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(event).ok(),
            OutputFormat::Flat => self.format_flat(event),
        }
    }

    fn format_flat(&self, event: &RunnerEvent) -> Option<String> {
        let line = match event {
            RunnerEvent::TestPass(report) => {
                let slow = if report.slow {
                    self.paint("33", " (slow)")
                } else {
                    String::new()
                };
                format!(
                    "{} [{}] {} [{}ms]{}",
                    self.paint("32", "✓"),
                    report.runnable.browser_id,
                    report.runnable.full_title,
                    report.duration_ms,
                    slow
                )
            }
            RunnerEvent::TestPending(pending) => format!(
                "{} [{}] {}{}",
                self.paint("36", "-"),
                pending.runnable.browser_id,
                pending.runnable.full_title,
                pending
                    .reason
                    .as_ref()
                    .map(|r| format!(" reason: {r}"))
                    .unwrap_or_default()
            ),
            RunnerEvent::TestFail(f) | RunnerEvent::SuiteFail(f) => {
                let via = f
                    .hook
                    .as_ref()
                    .map(|h| format!(" ({})", h.title))
                    .unwrap_or_default();
                format!(
                    "{} [{}] {}{}\n    {}",
                    self.paint("31", "✗"),
                    f.runnable.browser_id,
                    f.runnable.full_title,
                    via,
                    f.error
                )
            }
            RunnerEvent::Retry(notice) => {
                let kind = match notice.origin {
                    FailureOrigin::TestFail => "test",
                    FailureOrigin::SuiteFail => "suite",
                    FailureOrigin::Error => "error",
                };
                format!(
                    "{} [{}] {} ({}, retries left: {})\n    {}",
                    self.paint("33", "↻"),
                    notice.failure.runnable.browser_id,
                    notice.failure.runnable.full_title,
                    kind,
                    notice.retries_left,
                    notice.failure.error
                )
            }
            RunnerEvent::Error(f) => format!(
                "{} [{}] {}\n    {}",
                self.paint("31", "!"),
                f.runnable.browser_id,
                if f.runnable.full_title.is_empty() {
                    f.runnable.file.as_str()
                } else {
                    f.runnable.full_title.as_str()
                },
                f.error
            ),
            RunnerEvent::Info(notice) => format!("[{}] {}", notice.browser_id, notice.message),
            RunnerEvent::Warning(notice) => format!(
                "{} [{}] {}",
                self.paint("33", "warning:"),
                notice.browser_id,
                notice.message
            ),
            _ => return None,
        };
        Some(line)
    }

    /// Format the final summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::Flat => {
                let mut output = format!("\n{summary}");
                if self.colorize {
                    let status = if summary.is_success() {
                        self.paint("32", "PASSED")
                    } else {
                        self.paint("31", "FAILED")
                    };
                    output.push_str(&format!("Result: {status}\n"));
                }
                output
            }
        }
    }

    /// Format a suite tree listing
    pub fn format_tree(&self, tree: &SuiteTree) -> String {
        match self.format {
            OutputFormat::Json => {
                let tests: Vec<_> = tree
                    .tests()
                    .into_iter()
                    .map(|t| {
                        let node = tree.node(t);
                        serde_json::json!({
                            "browser_id": tree.browser_id(),
                            "file": node.file,
                            "full_title": node.full_title,
                            "pending": node.is_pending(),
                        })
                    })
                    .collect();
                serde_json::to_string(&tests).unwrap_or_default()
            }
            OutputFormat::Flat => format!("[{}]\n{}", tree.browser_id(), tree.render()),
        }
    }
}

impl Default for EventFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Flat)
    }
}

/// Write a summary to a file
pub fn write_summary_to_file(
    path: &str,
    summary: &RunSummary,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = EventFormatter::new(format).no_color();
    let content = formatter.format_summary(summary);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Failure, RetryNotice, RunnableRef, TestError, TestReport, UnitReport};
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_ref() -> RunnableRef {
        RunnableRef::test("login works", "a.yaml", "chrome")
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("FLAT"), Some(OutputFormat::Flat));
        assert_eq!(OutputFormat::from_str("table"), None);
    }

    #[test]
    fn test_flat_pass_and_retry() {
        let formatter = EventFormatter::new(OutputFormat::Flat).no_color();

        let pass = formatter
            .format_event(&RunnerEvent::TestPass(TestReport {
                runnable: test_ref(),
                duration_ms: 12,
                slow: true,
            }))
            .unwrap();
        assert_eq!(pass, "✓ [chrome] login works [12ms] (slow)");

        let retry = formatter
            .format_event(&RunnerEvent::Retry(RetryNotice {
                origin: FailureOrigin::TestFail,
                failure: Failure::new(TestError::failure("boom"), test_ref()),
                retries_left: 1,
                err: None,
            }))
            .unwrap();
        assert!(retry.starts_with("↻ [chrome] login works (test, retries left: 1)"));
        assert!(retry.contains("boom"));
    }

    #[test]
    fn test_flat_skips_lifecycle_events() {
        let formatter = EventFormatter::default().no_color();
        assert!(formatter
            .format_event(&RunnerEvent::TestBegin(test_ref()))
            .is_none());
    }

    #[test]
    fn test_json_event_line() {
        let formatter = EventFormatter::new(OutputFormat::Json);
        let line = formatter
            .format_event(&RunnerEvent::TestBegin(test_ref()))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["event"], "TEST_BEGIN");
        assert_eq!(value["full_title"], "login works");
    }

    #[test]
    fn test_write_summary() {
        let summary = RunSummary::new(
            Utc::now(),
            vec![UnitReport {
                browser_id: "chrome".to_string(),
                paths: vec!["a.yaml".to_string()],
                passes: 1,
                retries_left: 0,
                stats: Default::default(),
                duration_ms: 3,
            }],
        );

        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary_to_file(path.to_str().unwrap(), &summary, OutputFormat::Json).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["units"][0]["browser_id"], "chrome");
    }
}
