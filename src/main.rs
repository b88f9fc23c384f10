//! xbrowser - cross-browser test runner
//!
//! Runs suite files in several browsers at once. Every group of suite files
//! becomes an execution unit that re-runs exactly the tests that failed,
//! until they pass or the retry budget of the browser is spent.
//!
//! ## Usage
//!
//! ```bash
//! # Run every suite of a directory in two browsers
//! xbrowser run suites/ -b chrome -b firefox
//!
//! # Retry failed tests twice, JSON event lines on stdout
//! xbrowser run suites/login.yaml --retry 2 --format json
//!
//! # Print the suite tree without running it
//! xbrowser list suites/ -b chrome
//!
//! # Write an example configuration
//! xbrowser config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

mod adapter;
mod browser;
mod cli;
mod config;
mod executor;
mod models;
mod output;
mod retry;
mod skip;
mod utils;

use adapter::{collect_suite_files, SuiteLoader, YamlLoader};
use browser::{BrowserPool, LocalPool};
use cli::Args;
use config::{AppConfig, EnvConfig};
use executor::{run_browsers, Coordinator, Grouping};
use output::{EventFormatter, OutputFormat};
use skip::TestSkipper;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = args
        .log_level
        .as_deref()
        .or(env.log_level.as_deref())
        .and_then(LogLevel::from_str)
        .unwrap_or(if args.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        });
    init_logger(level);

    let config_path = args.config.clone().or_else(|| env.config_file.clone());

    match args.command {
        cli::Command::Run(run_args) => {
            let config = load_config(config_path.as_deref(), &env)?;
            if !run_suites(config, run_args).await? {
                std::process::exit(1);
            }
        }
        cli::Command::List(list_args) => {
            let config = load_config(config_path.as_deref(), &env)?;
            list_suites(config, list_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_path.as_deref(), &env, config_args)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>, env: &EnvConfig) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load(config::expand_path(path))?,
        None => AppConfig::load_default()?,
    };
    config.apply_env(env);
    config.validate()?;
    Ok(config)
}

/// Browsers from the command line, or every configured browser
fn resolve_browsers(config: &AppConfig, requested: Vec<String>) -> Result<Vec<String>> {
    let browsers = if requested.is_empty() {
        config.browsers.keys().cloned().collect()
    } else {
        requested
    };

    if browsers.is_empty() {
        anyhow::bail!("No browsers given. Use --browser <id> or configure `browsers`.");
    }
    config.ensure_browsers(&browsers)?;
    Ok(browsers)
}

fn resolve_files(config: &AppConfig, requested: Vec<String>) -> Result<Vec<String>> {
    let paths = if requested.is_empty() {
        config.specs.clone()
    } else {
        requested
    };

    let files = collect_suite_files(&paths).context("Failed to collect suite files")?;
    if files.is_empty() {
        anyhow::bail!("No suite files found. Pass paths or configure `specs`.");
    }
    Ok(files)
}

fn build_pool(config: &AppConfig, browsers: &[String]) -> Arc<dyn BrowserPool> {
    let pool = browsers.iter().fold(LocalPool::new(), |pool, id| {
        let settings = config.for_browser(id);
        pool.with_browser(id.clone(), settings.sessions_per_browser)
    });
    Arc::new(pool)
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(format).ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))
}

async fn run_suites(mut config: AppConfig, args: cli::RunArgs) -> Result<bool> {
    if let Some(retry) = args.retry {
        config.retry = retry;
        for browser in config.browsers.values_mut() {
            browser.retry = None;
        }
    }

    let browsers = resolve_browsers(&config, args.browsers)?;
    let files = resolve_files(&config, args.paths)?;
    let grouping = Grouping::from_str(&args.grouping)
        .ok_or_else(|| anyhow::anyhow!("Unknown grouping: {}", args.grouping))?;
    let format = parse_format(&args.format)?;

    let formatter = || {
        let formatter = EventFormatter::new(format);
        if args.no_color {
            formatter.no_color()
        } else {
            formatter
        }
    };

    info!(
        "Running {} files in {} ({} retries)",
        files.len(),
        browsers.join(", "),
        config.retry
    );

    let pool = build_pool(&config, &browsers);
    let loader: Arc<dyn SuiteLoader> = Arc::new(YamlLoader::new());
    let groups = grouping.split(files);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let event_formatter = formatter();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = event_formatter.format_event(&event) {
                println!("{line}");
            }
        }
    });

    let result = run_browsers(&config, &browsers, pool, loader, groups, tx).await;
    printer.await.context("Event printer stopped")?;
    let summary = result?;

    println!("{}", formatter().format_summary(&summary));

    if let Some(path) = &args.output {
        output::write_summary_to_file(path, &summary, format)
            .with_context(|| format!("Failed to write summary to {path}"))?;
        info!("Summary saved to {}", path);
    }

    Ok(summary.is_success() || config.no_exit_code || args.no_exit_code)
}

fn list_suites(config: AppConfig, args: cli::ListArgs) -> Result<()> {
    let browsers = resolve_browsers(&config, args.browsers)?;
    let files = resolve_files(&config, args.paths)?;
    let formatter = EventFormatter::new(parse_format(&args.format)?);

    let pool = build_pool(&config, &browsers);
    let loader: Arc<dyn SuiteLoader> = Arc::new(YamlLoader::new());
    let skipper = Arc::new(TestSkipper::new(&config.skip)?);

    for browser_id in &browsers {
        let coordinator = Coordinator::new(
            config.for_browser(browser_id),
            pool.clone(),
            loader.clone(),
            config.system.clone(),
        )
        .with_skipper(skipper.clone());

        let tree = coordinator.build_suite_tree(&files)?;
        println!("{}", formatter.format_tree(&tree));
    }

    Ok(())
}

fn manage_config(path: Option<&str>, env: &EnvConfig, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            AppConfig::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: show_env, format } => {
            if show_env {
                config::print_env_help();
                if env.has_any() {
                    println!();
                    println!("Currently set: {env:?}");
                }
            } else {
                let config = load_config(path, env)?;
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| path.map(str::to_string))
                .or_else(|| config::find_config().map(|p| p.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "./xbrowser.yaml".to_string());

            match AppConfig::load(config::expand_path(&path)) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
