//! Configuration module
//!
//! Handles loading and managing runner configuration.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{expand_path, find_config, is_yaml_file};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::skip::SkipRule;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Retry budget per execution unit
    pub retry: u32,

    /// Maximum sessions held at once per browser
    pub sessions_per_browser: usize,

    /// Exit with success even when tests failed
    pub no_exit_code: bool,

    /// Settings shared by every unit
    pub system: SystemConfig,

    /// Browser-specific overrides keyed by browser id
    pub browsers: BTreeMap<String, BrowserConfig>,

    /// Default suite files
    pub specs: Vec<String>,

    /// Skip rules applied before the first pass of each unit
    pub skip: Vec<SkipRule>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            retry: 0,
            sessions_per_browser: 1,
            no_exit_code: false,
            system: SystemConfig::default(),
            browsers: BTreeMap::new(),
            specs: Vec::new(),
            skip: Vec::new(),
        }
    }
}

/// Settings passed to the adapter of every unit
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub mocha_opts: MochaOpts,

    /// Shared context handed to every test body
    pub ctx: serde_json::Value,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            mocha_opts: MochaOpts::default(),
            ctx: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Adapter execution options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MochaOpts {
    /// Tests slower than this are flagged as slow
    pub slow_ms: u64,

    /// Per-runnable timeout, 0 disables it
    pub timeout_ms: u64,
}

impl Default for MochaOpts {
    fn default() -> Self {
        Self {
            slow_ms: 10_000,
            timeout_ms: 60_000,
        }
    }
}

/// Browser-specific configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub retry: Option<u32>,
    pub sessions_per_browser: Option<usize>,
    pub desired_capabilities: Option<serde_json::Value>,
}

/// Effective settings for one browser
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrowserSettings {
    pub browser_id: String,
    pub retry: u32,
    pub sessions_per_browser: usize,
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the first standard location, or defaults
    pub fn load_default() -> Result<Self> {
        match find_config() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sessions_per_browser == 0 {
            anyhow::bail!("sessions_per_browser must be positive");
        }

        for (id, browser) in &self.browsers {
            if browser.sessions_per_browser == Some(0) {
                anyhow::bail!("sessions_per_browser must be positive for browser '{id}'");
            }
        }

        for rule in &self.skip {
            rule.compile()
                .with_context(|| format!("Invalid skip rule for browser '{}'", rule.browser))?;
        }

        Ok(())
    }

    /// Effective settings for a browser, overrides merged over globals
    pub fn for_browser(&self, browser_id: &str) -> BrowserSettings {
        let browser = self.browsers.get(browser_id);

        BrowserSettings {
            browser_id: browser_id.to_string(),
            retry: browser.and_then(|b| b.retry).unwrap_or(self.retry),
            sessions_per_browser: browser
                .and_then(|b| b.sessions_per_browser)
                .unwrap_or(self.sessions_per_browser),
        }
    }

    /// Fail if a requested browser is not configured
    pub fn ensure_browsers(&self, browser_ids: &[String]) -> Result<()> {
        if self.browsers.is_empty() {
            return Ok(());
        }
        for id in browser_ids {
            if !self.browsers.contains_key(id) {
                anyhow::bail!("Unknown browser: {id}");
            }
        }
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(retry) = env.retry {
            self.retry = retry;
        }
        if let Some(sessions) = env.sessions_per_browser {
            self.sessions_per_browser = sessions;
        }
        if let Some(timeout) = env.timeout {
            self.system.mocha_opts.timeout_ms = timeout;
        }
        if let Some(no_exit_code) = env.no_exit_code {
            self.no_exit_code = no_exit_code;
        }
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let mut browsers = BTreeMap::new();
        browsers.insert(
            "chrome".to_string(),
            BrowserConfig {
                retry: Some(2),
                sessions_per_browser: Some(2),
                desired_capabilities: Some(serde_json::json!({"browserName": "chrome"})),
            },
        );
        browsers.insert(
            "firefox".to_string(),
            BrowserConfig {
                desired_capabilities: Some(serde_json::json!({"browserName": "firefox"})),
                ..Default::default()
            },
        );

        Self {
            retry: 1,
            browsers,
            specs: vec!["suites/".to_string()],
            skip: vec![SkipRule {
                browser: "firefox".to_string(),
                title: Some("clipboard".to_string()),
                reason: Some("clipboard API is not available".to_string()),
            }],
            ..Default::default()
        }
    }
}
