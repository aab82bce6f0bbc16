//! Depth-bounded directory discovery.
//!
//! One walker thread per root path feeds a shared channel. A coordinator
//! thread joins the walkers and then drops the last sender, which closes the
//! channel; consumers treat a closed, drained channel as "discovery finished".

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::log_store::{Level, LogStore};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read subdir names of '{}': {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("abs parent dir '{raw}': {source}")]
    Normalize {
        raw: String,
        #[source]
        source: io::Error,
    },

    #[error("spawn walker thread for '{}': {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("target channel closed while walking '{}'", .path.display())]
    ChannelClosed { path: PathBuf },
}

/// Store key for a directory.
pub fn dir_key(path: &Path) -> String {
    path.display().to_string()
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Recursively emit target directories below `path`.
///
/// `depth` is the remaining budget; a negative budget walks nothing. A
/// non-root directory is emitted only when it has at least one entry, and a
/// budget of zero stops recursion below it. The root call itself is never
/// emitted and always looks at its immediate children, so depths 0 and 1
/// both yield the root's direct subdirectories.
///
/// Any open/list failure aborts the rest of this walk and is returned.
pub fn walk(
    path: &Path,
    is_root: bool,
    depth: i32,
    targets: &Sender<PathBuf>,
) -> Result<(), DiscoveryError> {
    if depth < 0 {
        return Ok(());
    }

    let metadata = fs::metadata(path).map_err(|source| DiscoveryError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Ok(());
    }

    let mut names = child_names(path)?;
    if names.is_empty() {
        warn!("ignore empty dir '{}'.", path.display());
        return Ok(());
    }

    if !is_root {
        debug!(dir = %path.display(), "discovered target dir");
        targets
            .send(path.to_path_buf())
            .map_err(|_| DiscoveryError::ChannelClosed {
                path: path.to_path_buf(),
            })?;
        if depth == 0 {
            return Ok(());
        }
    }

    let next_depth = if is_root { depth.max(1) - 1 } else { depth - 1 };
    names.sort();
    for name in names.iter().filter(|n| !is_hidden(n)) {
        walk(&path.join(name), false, next_depth, targets)?;
    }

    Ok(())
}

fn child_names(path: &Path) -> Result<Vec<String>, DiscoveryError> {
    let read_err = |source| DiscoveryError::ReadDir {
        path: path.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(path).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Make a caller-supplied root path absolute.
pub fn normalize_root(raw: &str) -> Result<PathBuf, DiscoveryError> {
    std::path::absolute(raw).map_err(|source| DiscoveryError::Normalize {
        raw: raw.to_string(),
        source,
    })
}

/// Start discovery under every root and return the receiving end of the
/// target channel.
///
/// Roots that cannot be normalized, and walks that fail, are recorded as
/// ERROR entries in `store` (keyed by the root) without affecting the other
/// roots. The channel closes once every walk has finished.
pub fn discover_all(
    roots: &[String],
    depth: i32,
    store: Arc<LogStore>,
) -> Result<Receiver<PathBuf>, DiscoveryError> {
    let mut abs_roots = BTreeSet::new();
    for raw in roots {
        info!("check parent dir '{}'.", raw);
        match normalize_root(raw) {
            Ok(root) => {
                abs_roots.insert(root);
            }
            Err(e) => {
                error!("{}", e);
                store.append(raw, Level::Error, e.to_string());
            }
        }
    }

    let (tx, rx) = unbounded();
    let mut walkers: Vec<JoinHandle<()>> = Vec::with_capacity(abs_roots.len());

    for (id, root) in abs_roots.into_iter().enumerate() {
        let tx = tx.clone();
        let walker_store = Arc::clone(&store);
        let walk_root = root.clone();
        let spawned = thread::Builder::new()
            .name(format!("walker-{}", id))
            .spawn(move || {
                if let Err(e) = walk(&walk_root, true, depth, &tx) {
                    error!("find all subdirs of '{}': {}", walk_root.display(), e);
                    walker_store.append(
                        &dir_key(&walk_root),
                        Level::Error,
                        format!("find all subdirs: {}", e),
                    );
                }
            });

        match spawned {
            Ok(handle) => walkers.push(handle),
            Err(source) => {
                let key = dir_key(&root);
                let e = DiscoveryError::Spawn { path: root, source };
                error!("{}", e);
                store.append(&key, Level::Error, e.to_string());
            }
        }
    }

    thread::Builder::new()
        .name("discovery".into())
        .spawn(move || {
            for handle in walkers {
                if handle.join().is_err() {
                    error!("walker thread panicked");
                }
            }
            debug!("discovery finished, closing target channel");
            drop(tx);
        })
        .map_err(|source| DiscoveryError::Spawn {
            path: PathBuf::from("<coordinator>"),
            source,
        })?;

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn mkdir_with_file(base: &Path, rel: &str) -> PathBuf {
        let dir = base.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("file.txt"), b"x").unwrap();
        dir
    }

    fn collect(root: &Path, depth: i32) -> Vec<PathBuf> {
        let (tx, rx) = unbounded();
        walk(root, true, depth, &tx).unwrap();
        drop(tx);
        let mut found: Vec<_> = rx.iter().collect();
        found.sort();
        found
    }

    #[test]
    fn immediate_children_at_depth_one() {
        let tmp = TempDir::new("walk").unwrap();
        let a = mkdir_with_file(tmp.path(), "a");
        let b = mkdir_with_file(tmp.path(), "b");
        fs::create_dir(tmp.path().join("c")).unwrap();

        assert_eq!(collect(tmp.path(), 1), vec![a, b]);
    }

    #[test]
    fn depth_zero_still_yields_children() {
        let tmp = TempDir::new("walk").unwrap();
        let a = mkdir_with_file(tmp.path(), "a");
        mkdir_with_file(tmp.path(), "a/deep");

        assert_eq!(collect(tmp.path(), 0), vec![a]);
    }

    #[test]
    fn deeper_budget_recurses() {
        let tmp = TempDir::new("walk").unwrap();
        let a = mkdir_with_file(tmp.path(), "a");
        let deep = mkdir_with_file(tmp.path(), "a/deep");
        mkdir_with_file(tmp.path(), "a/deep/deeper");

        assert_eq!(collect(tmp.path(), 2), vec![a, deep]);
    }

    #[test]
    fn negative_depth_walks_nothing() {
        let tmp = TempDir::new("walk").unwrap();
        mkdir_with_file(tmp.path(), "a");
        assert!(collect(tmp.path(), -1).is_empty());
    }

    #[test]
    fn hidden_dirs_never_emitted_or_entered() {
        let tmp = TempDir::new("walk").unwrap();
        let a = mkdir_with_file(tmp.path(), "a");
        mkdir_with_file(tmp.path(), ".git");
        mkdir_with_file(tmp.path(), "a/.cache");
        mkdir_with_file(tmp.path(), ".hidden/visible");

        assert_eq!(collect(tmp.path(), 3), vec![a]);
    }

    #[test]
    fn dir_with_only_hidden_entries_is_not_empty() {
        let tmp = TempDir::new("walk").unwrap();
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();

        assert_eq!(collect(tmp.path(), 1), vec![repo]);
    }

    #[test]
    fn root_is_never_emitted() {
        let tmp = TempDir::new("walk").unwrap();
        fs::write(tmp.path().join("only-a-file"), b"x").unwrap();
        assert!(collect(tmp.path(), 5).is_empty());
    }

    #[test]
    fn non_directory_root_is_not_an_error() {
        let tmp = TempDir::new("walk").unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(collect(&file, 1).is_empty());
    }

    #[test]
    fn missing_root_is_an_open_error() {
        let tmp = TempDir::new("walk").unwrap();
        let missing = tmp.path().join("nope");
        let (tx, _rx) = unbounded();
        let err = walk(&missing, true, 1, &tx).unwrap_err();
        assert!(matches!(err, DiscoveryError::Open { ref path, .. } if *path == missing));
    }

    #[test]
    fn normalize_makes_relative_paths_absolute() {
        let root = normalize_root("some/relative").unwrap();
        assert!(root.is_absolute());
        assert!(root.ends_with("some/relative"));
        assert!(normalize_root("").is_err());
    }

    #[test]
    fn discover_all_closes_channel_and_logs_failures() {
        let tmp = TempDir::new("discover").unwrap();
        let one = tmp.path().join("one");
        let two = tmp.path().join("two");
        let a = mkdir_with_file(&one, "a");
        let b = mkdir_with_file(&two, "b");
        let missing = tmp.path().join("missing");

        let roots = vec![
            dir_key(&one),
            dir_key(&two),
            dir_key(&one),
            dir_key(&missing),
        ];
        let store = Arc::new(LogStore::default());
        let rx = discover_all(&roots, 1, Arc::clone(&store)).unwrap();

        // iter() only ends once the coordinator has dropped the last sender
        let mut found: Vec<_> = rx.iter().collect();
        found.sort();
        assert_eq!(found, vec![a, b]);

        let errors = store.get(&dir_key(&missing)).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].level(), Level::Error);
        assert!(errors[0].content().starts_with("find all subdirs:"));
    }
}
