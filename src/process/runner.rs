use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use super::tree::ProcessTreeGuard;
use crate::config::STDERR_TAIL_BYTES;

/// How long to wait for stderr to drain once the process has exited.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully built external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value of the first `--name=value` style argument.
    pub fn arg_value(&self, prefix: &str) -> Option<&str> {
        self.args.iter().find_map(|a| a.strip_prefix(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("process timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Spawns a command and waits for it with a wall-clock bound.
///
/// Implementations must terminate the process when the timeout expires and
/// when the returned future is dropped before completion.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> impl Future<Output = Result<ProcessOutput, RunError>> + Send;
}

/// Real runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<ProcessOutput, RunError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

        let mut child = cmd.spawn().map_err(RunError::Spawn)?;
        debug!("Spawned {} (PID {:?})", command.program, child.id());
        // Covers the timeout below and the future being dropped mid-wait.
        let mut tree = ProcessTreeGuard::new(child.id());

        let stderr_handle = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES)));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tree.disarm();
                status
            }
            Ok(Err(e)) => return Err(RunError::Wait(e)),
            Err(_) => {
                warn!(
                    "{} timed out after {}s, killing its process tree",
                    command.program,
                    timeout.as_secs()
                );
                tree.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out process: {}", e);
                }
                return Err(RunError::TimedOut(timeout));
            }
        };

        let stderr = match stderr_handle {
            Some(handle) => match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!("stderr reader failed: {}", e);
                    String::new()
                }
                Err(_) => {
                    debug!("stderr still open after exit, giving up on it");
                    String::new()
                }
            },
            None => String::new(),
        };

        Ok(ProcessOutput {
            exit_code: status.code(),
            success: status.success(),
            stderr,
        })
    }
}

/// Read a stream to EOF, keeping only the last `limit` bytes.
async fn read_tail(mut stderr: ChildStderr, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) => {
                warn!("Error reading process stderr: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}
