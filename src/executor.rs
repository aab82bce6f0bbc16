use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::discovery::dir_key;
use crate::log_store::{Level, LogStore};

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("change dir: '{}': {source}", .dir.display())]
    ChangeDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("change dir: '{}' is not a directory", .dir.display())]
    NotADirectory { dir: PathBuf },

    #[error("empty program name")]
    EmptyProgram,

    #[error("spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("exit status {0}")]
    Exit(i32),

    #[error("signal: {0}")]
    Signal(String),

    #[error("deadline exceeded: killed after timeout of {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("wait for process: {0}")]
    Wait(#[source] io::Error),
}

/// Split a command line on single spaces.
///
/// There is no quoting: every space delimits, so consecutive spaces yield
/// empty arguments.
pub fn split_command(command: &str) -> (&str, Vec<&str>) {
    let mut parts = command.split(' ');
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

/// Result of one finished (or killed) invocation.
#[derive(Debug)]
pub struct Execution {
    pub output: Vec<u8>,
    pub error: Option<ExecError>,
}

/// Runs one command line in target directories and records the results.
#[derive(Debug, Clone)]
pub struct Executor {
    command: String,
    timeout: Duration,
}

impl Executor {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Run the command in `dir`, appending its log entries to `store`.
    pub fn execute(&self, dir: &Path, store: &LogStore) {
        let key = dir_key(dir);
        store.append(&key, Level::Debug, "entry into target dir.");

        if let Err(e) = check_dir(dir) {
            store.append(&key, Level::Error, e.to_string());
            return;
        }

        store.append(
            &key,
            Level::Debug,
            format!("execute command '{}'.", self.command),
        );

        let execution = self.run_in(dir);
        store.append(
            &key,
            Level::Info,
            format!("output: \n{}", String::from_utf8_lossy(&execution.output)),
        );
        if let Some(e) = execution.error {
            store.append(
                &key,
                Level::Error,
                format!("run command '{}': {}", self.command, e),
            );
        }
    }

    /// Spawn the command with `dir` as its working directory and wait for it
    /// under the configured deadline, capturing stdout and stderr together.
    ///
    /// The deadline covers draining the output pipes too, so a background
    /// process that keeps them open past the deadline counts as a timeout.
    pub fn run_in(&self, dir: &Path) -> Execution {
        let (program, args) = split_command(&self.command);
        if program.is_empty() {
            return Execution {
                output: Vec::new(),
                error: Some(ExecError::EmptyProgram),
            };
        }

        let spawned = Command::new(program)
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                return Execution {
                    output: Vec::new(),
                    error: Some(ExecError::Spawn {
                        program: program.to_string(),
                        source,
                    }),
                }
            }
        };

        let deadline = Instant::now() + self.timeout;
        let combined = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = bounded(2);
        let readers = spawn_readers(&mut child, &combined, &done_tx);
        drop(done_tx);

        let error = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => {
                if readers_finished(&done_rx, readers, deadline) {
                    describe_failure(status)
                } else {
                    debug!(dir = %dir.display(), "output still open at deadline");
                    Some(ExecError::Timeout(self.timeout))
                }
            }
            Ok(None) => {
                debug!(dir = %dir.display(), "deadline exceeded, killing process");
                let _ = child.kill();
                let _ = child.wait();
                // Readers are left to finish on their own: a grandchild may
                // still hold the pipes open.
                Some(ExecError::Timeout(self.timeout))
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Some(ExecError::Wait(e))
            }
        };

        let output = combined.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Execution { output, error }
    }
}

/// Fails the same way a `chdir` into `dir` would: missing, not a directory,
/// or not searchable. Stat-ing `dir/.` needs search permission on `dir`.
fn check_dir(dir: &Path) -> Result<(), ExecError> {
    let change_dir_err = |source| ExecError::ChangeDir {
        dir: dir.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(dir).map_err(change_dir_err)?;
    if !metadata.is_dir() {
        return Err(ExecError::NotADirectory {
            dir: dir.to_path_buf(),
        });
    }
    fs::metadata(dir.join(".")).map_err(change_dir_err)?;
    Ok(())
}

/// Start a drain thread per captured pipe; returns how many were started.
fn spawn_readers(
    child: &mut Child,
    combined: &Arc<Mutex<Vec<u8>>>,
    done: &Sender<()>,
) -> usize {
    let mut readers = 0;
    if let Some(stdout) = child.stdout.take() {
        drain_into(stdout, Arc::clone(combined), done.clone());
        readers += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        drain_into(stderr, Arc::clone(combined), done.clone());
        readers += 1;
    }
    readers
}

fn drain_into<R>(mut pipe: R, combined: Arc<Mutex<Vec<u8>>>, done: Sender<()>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => combined
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&buf[..n]),
            }
        }
        let _ = done.send(());
    });
}

/// Wait until `readers` drain threads hit end-of-file, or until `deadline`.
fn readers_finished(done: &Receiver<()>, readers: usize, deadline: Instant) -> bool {
    for _ in 0..readers {
        match done.recv_deadline(deadline) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => return false,
            // every drain thread is gone
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    true
}

fn describe_failure(status: ExitStatus) -> Option<ExecError> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(ExecError::Exit(code));
    }
    Some(ExecError::Signal(signal_name(status)))
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn signal_name(status: ExitStatus) -> String {
            use std::os::unix::process::ExitStatusExt;
            match status.signal() {
                Some(libc::SIGKILL) => "killed".to_string(),
                Some(libc::SIGTERM) => "terminated".to_string(),
                Some(libc::SIGINT) => "interrupt".to_string(),
                Some(libc::SIGABRT) => "aborted".to_string(),
                Some(libc::SIGSEGV) => "segmentation fault".to_string(),
                Some(libc::SIGPIPE) => "broken pipe".to_string(),
                Some(other) => format!("signal {}", other),
                None => "unknown".to_string(),
            }
        }
    } else {
        fn signal_name(_status: ExitStatus) -> String {
            "unknown".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_single_spaces() {
        assert_eq!(split_command("echo hi"), ("echo", vec!["hi"]));
        assert_eq!(split_command("ls"), ("ls", vec![]));
        assert_eq!(split_command("a  b"), ("a", vec!["", "b"]));
        assert_eq!(
            split_command("echo \"two words\""),
            ("echo", vec!["\"two", "words\""])
        );
        assert_eq!(split_command(""), ("", vec![]));
    }

    #[test]
    fn missing_dir_short_circuits() {
        let store = LogStore::with_verbosity(true);
        let dir = Path::new("/definitely/not/here/batchcmd");
        Executor::new("echo hi", Duration::from_secs(5)).execute(dir, &store);

        let entries = store.get(&dir_key(dir)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level(), Level::Debug);
        assert_eq!(entries[1].level(), Level::Error);
        assert!(entries[1].content().starts_with("change dir:"));
    }

    #[test]
    fn empty_program_is_an_error() {
        let exec = Executor::new(" leading-space", Duration::from_secs(1)).run_in(Path::new("."));
        assert!(matches!(exec.error, Some(ExecError::EmptyProgram)));
    }

    #[test]
    fn unknown_program_fails_to_spawn() {
        let exec = Executor::new("batchcmd-no-such-program-xyz", Duration::from_secs(1))
            .run_in(Path::new("."));
        assert!(matches!(exec.error, Some(ExecError::Spawn { .. })));
        assert!(exec.output.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_runs_in_dir() {
        let tmp = tempdir::TempDir::new("exec").unwrap();
        std::fs::write(tmp.path().join("marker.txt"), b"x").unwrap();

        let exec = Executor::new("ls", Duration::from_secs(10)).run_in(tmp.path());
        assert!(exec.error.is_none());
        assert!(String::from_utf8_lossy(&exec.output).contains("marker.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_is_captured() {
        let exec = Executor::new("ls /definitely/not/here/batchcmd", Duration::from_secs(10))
            .run_in(Path::new("/"));
        assert!(matches!(exec.error, Some(ExecError::Exit(code)) if code != 0));
        assert!(!exec.output.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_recorded() {
        let store = LogStore::default();
        let dir = std::env::temp_dir();
        Executor::new("false", Duration::from_secs(10)).execute(&dir, &store);

        let entries = store.get(&dir_key(&dir)).unwrap();
        let levels: Vec<_> = entries.iter().map(|e| e.level()).collect();
        assert_eq!(levels, vec![Level::Info, Level::Error]);
        assert_eq!(entries[1].content(), "run command 'false': exit status 1");
    }

    #[cfg(unix)]
    #[test]
    fn background_process_holding_output_times_out() {
        let tmp = tempdir::TempDir::new("exec").unwrap();
        std::fs::write(tmp.path().join("bg.sh"), "sleep 6 &\necho started\n").unwrap();

        let start = std::time::Instant::now();
        let exec = Executor::new("sh bg.sh", Duration::from_secs(1)).run_in(tmp.path());
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(matches!(exec.error, Some(ExecError::Timeout(_))));
        assert!(String::from_utf8_lossy(&exec.output).contains("started"));
    }

    #[cfg(unix)]
    #[test]
    fn unsearchable_dir_short_circuits() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir::TempDir::new("exec").unwrap();
        let dir = tmp.path().join("locked");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("file.txt"), b"x").unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o644)).unwrap();

        // privileged users ignore the missing search bit
        let privileged = std::fs::metadata(dir.join("file.txt")).is_ok();

        let store = LogStore::with_verbosity(true);
        Executor::new("echo hi", Duration::from_secs(5)).execute(&dir, &store);
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();
        if privileged {
            return;
        }

        let entries = store.get(&dir_key(&dir)).unwrap();
        let levels: Vec<_> = entries.iter().map(|e| e.level()).collect();
        assert_eq!(levels, vec![Level::Debug, Level::Error]);
        assert!(entries[1].content().starts_with("change dir:"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_process() {
        let start = std::time::Instant::now();
        let exec = Executor::new("sleep 10", Duration::from_millis(200)).run_in(Path::new("/"));
        assert!(start.elapsed() < Duration::from_secs(5));
        let err = exec.error.unwrap();
        assert!(matches!(err, ExecError::Timeout(_)));
        assert!(err.to_string().contains("deadline exceeded"));
    }
}
