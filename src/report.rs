use std::fmt;
use std::io::{self, Write};
use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;

use crate::log_store::{LogEntry, LogStore};

pub const SEPARATOR: &str = "------------------------------------------------------------";

/// Per-directory classification derived from its log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "errors", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure(usize),
}

impl Outcome {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        match entries.iter().filter(|e| e.level().is_failure()).count() {
            0 => Outcome::Success,
            n => Outcome::Failure(n),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure(n) => write!(f, "failure({})", n),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryReport {
    pub dir: String,
    pub entries: Vec<LogEntry>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub directories: Vec<DirectoryReport>,
}

impl Report {
    /// Build the report from a snapshot of `store`, ordered by directory.
    pub fn from_store(store: &LogStore) -> Self {
        let directories = store
            .snapshot()
            .into_iter()
            .map(|(dir, entries)| DirectoryReport {
                outcome: Outcome::from_entries(&entries),
                dir,
                entries,
            })
            .collect();
        Self { directories }
    }

    pub fn succeeded(&self) -> usize {
        self.directories
            .iter()
            .filter(|d| d.outcome.is_success())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.directories.len() - self.succeeded()
    }

    pub fn outcome_of(&self, dir: &str) -> Option<Outcome> {
        self.directories
            .iter()
            .find(|d| d.dir == dir)
            .map(|d| d.outcome)
    }

    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for d in &self.directories {
            writeln!(out, "{}", SEPARATOR)?;
            writeln!(out, "Target Dir: {}", d.dir)?;
            for (i, entry) in d.entries.iter().enumerate() {
                let line = format!("  {}. {}", i + 1, entry);
                if entry.level().is_failure() {
                    writeln!(out, "{}", line.red())?;
                } else {
                    writeln!(out, "{}", line)?;
                }
            }
        }

        writeln!(out, "{}", SEPARATOR)?;
        writeln!(out, "Summary: ")?;
        for (i, d) in self.directories.iter().enumerate() {
            let line = format!("  {}. {}: {}.", i + 1, d.dir, d.outcome);
            if d.outcome.is_success() {
                writeln!(out, "{}", line.green())?;
            } else {
                writeln!(out, "{}", line.red())?;
            }
        }
        writeln!(out, "{}", SEPARATOR)?;
        writeln!(out, "The command(s) execution has been finished.")
    }
}

/// Sorted list of discovered directories printed in dry-run mode.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetList {
    pub targets: Vec<String>,
}

impl TargetList {
    pub fn new(targets: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut targets: Vec<String> = targets
            .into_iter()
            .map(|p| p.display().to_string())
            .collect();
        targets.sort();
        Self { targets }
    }

    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", SEPARATOR)?;
        writeln!(out, "Target dirs({}): ", self.targets.len())?;
        for (i, dir) in self.targets.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, dir)?;
        }
        writeln!(out, "{}", SEPARATOR)?;
        writeln!(
            out,
            "{}",
            "The command(s) execution has been ignored in mock mode.".yellow()
        )
    }
}
