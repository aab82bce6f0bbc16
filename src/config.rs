use std::env;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::pool::default_concurrency;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Run one command in many directories", long_about = None)]
pub struct Cli {
    /// The command to execute in every target directory
    #[arg(short = 'c', long, default_value = "")]
    pub command: String,

    /// Parent path(s) of the target directories, separated by commas (default: current dir)
    #[arg(short = 'p', long = "parent-dirs")]
    pub parent_dirs: Option<String>,

    /// Max search depth for target directories below each parent path
    #[arg(short = 'd', long, default_value = "1", allow_negative_numbers = true)]
    pub depth: i32,

    /// Only list the target directories, do not execute the command
    #[arg(short = 'm', long = "mock", visible_alias = "dry-run")]
    pub mock: bool,

    /// Timeout in seconds per command
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64), default_value = "30")]
    pub timeout: u64,

    /// Keep DEBUG entries and print debug diagnostics
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Number of commands to run in parallel (default: available CPUs)
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u32))]
    pub jobs: Option<u32>,

    /// Terminal coloring
    #[arg(long, value_parser = ["on", "off"])]
    pub color: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("The argument '-c' is NOT specified!")]
    MissingCommand,

    #[error("timeout must be at least one second")]
    ZeroTimeout,

    #[error("job count must be at least one")]
    ZeroJobs,

    #[error("work dir getting error: {0}")]
    WorkDir(#[source] std::io::Error),
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub command: String,
    pub parent_dirs: Vec<String>,
    pub depth: i32,
    pub mock: bool,
    pub timeout: Duration,
    pub verbose: bool,
    pub jobs: usize,
    pub json: bool,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if cli.command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        if cli.timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let jobs = match cli.jobs {
            Some(0) => return Err(ConfigError::ZeroJobs),
            Some(n) => n as usize,
            None => default_concurrency(),
        };

        let parent_dirs = match cli.parent_dirs.as_deref() {
            Some(dirs) if !dirs.is_empty() => dirs.split(',').map(str::to_string).collect(),
            _ => {
                let cwd = env::current_dir().map_err(ConfigError::WorkDir)?;
                vec![cwd.display().to_string()]
            }
        };

        Ok(Self {
            command: cli.command,
            parent_dirs,
            depth: cli.depth,
            mock: cli.mock,
            timeout: Duration::from_secs(cli.timeout),
            verbose: cli.verbose,
            jobs,
            json: cli.json,
        })
    }
}
