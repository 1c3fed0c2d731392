//! Subprocess execution for trigger actions.
//!
//! - No shell interpretation (direct exec)
//! - Timeout enforcement with kill and reap
//! - Captured stdout/stderr, drained while the child runs
//! - Environment control

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ActionErrorKind, DaemonError};

/// Bytes kept from each output stream; the rest is read and discarded.
pub const MAX_CAPTURED_OUTPUT: u64 = 64 * 1024;

/// Result of a subprocess execution.
#[derive(Debug, Clone)]
pub struct SubprocessResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl SubprocessResult {
    fn new(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>, duration: Duration) -> Self {
        Self {
            success: status.success(),
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration,
        }
    }
}

/// Read a pipe to EOF on its own thread, keeping the first
/// `MAX_CAPTURED_OUTPUT` bytes. Without this a child that fills the pipe
/// buffer blocks forever while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut captured = Vec::new();
        let _ = (&mut pipe).take(MAX_CAPTURED_OUTPUT).read_to_end(&mut captured);
        let _ = std::io::copy(&mut pipe, &mut std::io::sink());
        captured
    }))
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader.and_then(|r| r.join().ok()).unwrap_or_default()
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct SubprocessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
    clear_env: bool,
}

impl SubprocessBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
            clear_env: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args.extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clear the environment before running (then add only specified env vars).
    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Execute the command and wait for completion with timeout enforcement.
    ///
    /// Blocks the calling thread. A process that outlives the timeout is
    /// killed and reaped.
    pub fn run(&self) -> Result<SubprocessResult, DaemonError> {
        debug!(
            program = %self.program.display(),
            args = ?self.args,
            timeout_secs = self.timeout.as_secs(),
            "Executing subprocess"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        if self.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| DaemonError::Action {
            kind: ActionErrorKind::ExecutionFailed {
                message: format!("Failed to spawn {}: {}", self.program.display(), e),
            },
        })?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let duration = start.elapsed();
                    return Ok(SubprocessResult::new(
                        status,
                        collect(stdout),
                        collect(stderr),
                        duration,
                    ));
                }
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        warn!(
                            program = %self.program.display(),
                            timeout_secs = self.timeout.as_secs(),
                            "Process timed out, killing"
                        );
                        if let Err(e) = child.kill() {
                            warn!(error = %e, "Failed to kill timed-out process");
                        }
                        let _ = child.wait();
                        return Err(DaemonError::Action {
                            kind: ActionErrorKind::Timeout {
                                timeout_secs: self.timeout.as_secs(),
                            },
                        });
                    }
                    std::thread::sleep(poll_interval);
                }
                Err(e) => {
                    return Err(DaemonError::Action {
                        kind: ActionErrorKind::ExecutionFailed {
                            message: format!("Failed to check process status: {}", e),
                        },
                    });
                }
            }
        }
    }
}
