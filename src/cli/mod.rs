//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Cross-browser test runner with retry-aware suite execution
#[derive(Parser, Debug)]
#[command(name = "xbrowser")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run test suites across browsers, retrying failed tests")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (defaults to standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run suites in one or more browsers
    Run(RunArgs),

    /// Print the suite tree without running it
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite files or directories (defaults to `specs` from config)
    pub paths: Vec<String>,

    /// Browser ids to run in (defaults to every configured browser)
    #[arg(short, long = "browser")]
    pub browsers: Vec<String>,

    /// Retry budget, overrides configuration
    #[arg(short, long)]
    pub retry: Option<u32>,

    /// Output format (flat, json)
    #[arg(short, long, default_value = "flat")]
    pub format: String,

    /// How paths are split into execution units (file, single)
    #[arg(short, long, default_value = "file")]
    pub grouping: String,

    /// Save the run summary to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Exit with status 0 even when tests failed
    #[arg(long)]
    pub no_exit_code: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Suite files or directories (defaults to `specs` from config)
    pub paths: Vec<String>,

    /// Browser ids to list for
    #[arg(short, long = "browser")]
    pub browsers: Vec<String>,

    /// Output format (flat, json)
    #[arg(short, long, default_value = "flat")]
    pub format: String,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "xbrowser.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment variables instead
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to standard locations)
        file: Option<String>,
    },
}
