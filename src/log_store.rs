use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

/// Severity of a [`LogEntry`]. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }

    /// Whether an entry at this level counts against a directory's outcome.
    pub fn is_failure(&self) -> bool {
        *self >= Level::Error
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    level: Level,
    content: String,
}

impl LogEntry {
    pub fn new(level: Level, content: impl Into<String>) -> Self {
        Self {
            level,
            content: content.into(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.content)
    }
}

type DirLog = Arc<Mutex<Vec<LogEntry>>>;

/// Per-directory log lists shared by the discovery threads and the worker pool.
///
/// The outer map is only write-locked when a key is seen for the first time;
/// appends to an existing key take that key's own mutex, so workers writing
/// to different directories do not serialize on each other.
///
/// Entries below `min_level` are dropped at append time.
pub struct LogStore {
    min_level: Level,
    lists: RwLock<HashMap<String, DirLog>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new(Level::Info)
    }
}

impl LogStore {
    pub fn new(min_level: Level) -> Self {
        Self {
            min_level,
            lists: RwLock::new(HashMap::new()),
        }
    }

    /// A store that retains DEBUG entries when `verbose` is set, INFO and above otherwise.
    pub fn with_verbosity(verbose: bool) -> Self {
        Self::new(if verbose { Level::Debug } else { Level::Info })
    }

    /// Append an entry to `key`'s list, creating the list on first use.
    ///
    /// Returns `false` when the entry was filtered out or the key is empty.
    pub fn append(&self, key: &str, level: Level, content: impl Into<String>) -> bool {
        if key.is_empty() || level < self.min_level {
            return false;
        }
        let entry = LogEntry::new(level, content);
        let list = self.list_for(key);
        list.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
        true
    }

    fn list_for(&self, key: &str) -> DirLog {
        {
            let lists = self.lists.read().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = lists.get(key) {
                return Arc::clone(list);
            }
        }
        let mut lists = self.lists.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(lists.entry(key.to_string()).or_default())
    }

    /// Copy of the entries recorded for `key`, in append order.
    pub fn get(&self, key: &str) -> Option<Vec<LogEntry>> {
        let lists = self.lists.read().unwrap_or_else(|e| e.into_inner());
        lists
            .get(key)
            .map(|list| list.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn len(&self) -> usize {
        self.lists.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every list, keyed and ordered lexicographically.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<LogEntry>> {
        let lists = self.lists.read().unwrap_or_else(|e| e.into_inner());
        lists
            .iter()
            .map(|(key, list)| {
                let entries = list.lock().unwrap_or_else(|e| e.into_inner()).clone();
                (key.clone(), entries)
            })
            .collect()
    }
}
