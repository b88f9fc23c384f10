//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "XBROWSER";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Retry budget from XBROWSER_RETRY
    pub retry: Option<u32>,
    /// Session limit from XBROWSER_SESSIONS_PER_BROWSER
    pub sessions_per_browser: Option<usize>,
    /// Runnable timeout in ms from XBROWSER_TIMEOUT
    pub timeout: Option<u64>,
    /// Config file from XBROWSER_CONFIG
    pub config_file: Option<String>,
    /// From XBROWSER_NO_EXIT_CODE
    pub no_exit_code: Option<bool>,
    /// Log level from XBROWSER_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, called with prefixed names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}_{name}"));

        Self {
            retry: get("RETRY").and_then(|v| v.parse().ok()),
            sessions_per_browser: get("SESSIONS_PER_BROWSER").and_then(|v| v.parse().ok()),
            timeout: get("TIMEOUT").and_then(|v| v.parse().ok()),
            config_file: get("CONFIG"),
            no_exit_code: get("NO_EXIT_CODE").map(|v| parse_bool(&v)),
            log_level: get("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.retry.is_some()
            || self.sessions_per_browser.is_some()
            || self.timeout.is_some()
            || self.config_file.is_some()
            || self.no_exit_code.is_some()
            || self.log_level.is_some()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}

/// Print all XBROWSER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_RETRY                  Retry budget per execution unit");
    println!("  {ENV_PREFIX}_SESSIONS_PER_BROWSER   Concurrent sessions per browser");
    println!("  {ENV_PREFIX}_TIMEOUT                Runnable timeout in milliseconds");
    println!("  {ENV_PREFIX}_CONFIG                 Path to configuration file");
    println!("  {ENV_PREFIX}_NO_EXIT_CODE           Always exit with status 0 (true/false)");
    println!("  {ENV_PREFIX}_LOG                    Log level (trace, debug, info, warn, error)");
}
