use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use config::{ConfigError, RunConfig};
use executor::Executor;
use log_store::LogStore;
use report::{Report, TargetList};

pub mod config;
pub mod discovery;
pub mod executor;
pub mod log_store;
pub mod pool;
pub mod report;

/// What a run produced.
#[derive(Debug)]
pub enum RunOutput {
    /// Mock mode: the sorted targets, nothing executed.
    DryRun(TargetList),
    Executed(Report),
}

/// Discover targets under every parent dir and, unless mocking, run the
/// command in each of them.
pub fn execute(config: &RunConfig) -> Result<RunOutput> {
    let store = Arc::new(LogStore::with_verbosity(config.verbose));
    let targets = discovery::discover_all(&config.parent_dirs, config.depth, Arc::clone(&store))
        .context("Failed to start directory discovery")?;

    if config.mock {
        return Ok(RunOutput::DryRun(TargetList::new(targets.iter())));
    }

    let executor = Executor::new(config.command.clone(), config.timeout);
    let executed = pool::run_pool(targets, &executor, &store, config.jobs)?;
    info!(executed, "all workers finished");

    Ok(RunOutput::Executed(Report::from_store(&store)))
}

pub fn run(cli: config::Cli) -> Result<()> {
    match cli.color.as_deref() {
        Some("on") => colored::control::set_override(true),
        Some("off") => colored::control::set_override(false),
        _ => {}
    }

    let config = match RunConfig::from_cli(cli) {
        Ok(config) => config,
        Err(ConfigError::MissingCommand) => {
            eprintln!("{}", ConfigError::MissingCommand);
            return Ok(());
        }
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    if config.mock {
        info!("Starting... (in mock environment)");
    } else {
        info!("Starting... (in formal environment)");
    }
    info!(
        "Parameters: command='{}' parent_dirs={:?} depth={} mock={} timeout={}s jobs={}",
        config.command,
        config.parent_dirs,
        config.depth,
        config.mock,
        config.timeout.as_secs(),
        config.jobs
    );

    let output = execute(&config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match output {
        RunOutput::DryRun(targets) if config.json => {
            serde_json::to_writer_pretty(&mut out, &targets)?;
            writeln!(out)?;
        }
        RunOutput::DryRun(targets) => targets.render(&mut out)?,
        RunOutput::Executed(report) if config.json => {
            serde_json::to_writer_pretty(&mut out, &report)?;
            writeln!(out)?;
        }
        RunOutput::Executed(report) => {
            report.render(&mut out)?;
            info!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                "report complete"
            );
        }
    }

    Ok(())
}
