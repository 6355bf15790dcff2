//! Agent subprocess lifecycle.
//!
//! The agent binary is opaque: it consumes the constructed prompt on stdin
//! and produces combined output on stdout/stderr. Non-zero exit means
//! failure; the output is never parsed semantically.

use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Process timed out after {0} seconds")]
    Timeout(u64),

    #[error("Process was cancelled")]
    Cancelled,

    #[error("Agent binary not found: {0}")]
    BinaryNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Success,
    Error,
    Timeout,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Error => "error",
            RunOutcome::Timeout => "timeout",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// Shared cancellation flag observed by the wait loop.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Handle to a running agent process.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
}

impl AgentProcess {
    /// Spawn the agent binary with the prompt delivered on stdin. The write
    /// happens on its own thread so a non-reading child cannot block us.
    pub fn spawn(
        binary: &str,
        args: &[String],
        working_dir: &Path,
        prompt: &str,
    ) -> Result<Self, SpawnError> {
        let mut child = Command::new(binary)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SpawnError::BinaryNotFound(binary.to_string())
                } else {
                    SpawnError::SpawnFailed(e)
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = prompt.as_bytes().to_vec();
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(&payload) {
                    tracing::debug!("Agent stdin write ended early: {}", e);
                }
                // Dropping stdin closes the pipe so the agent sees EOF.
            });
        }

        Ok(Self { child })
    }

    /// Wait for completion, honoring the timeout and cancellation flag.
    /// Returns the exit code and combined stdout+stderr output.
    pub fn wait(
        mut self,
        timeout: Option<Duration>,
        cancel: &CancelHandle,
    ) -> Result<(Option<i32>, String), SpawnError> {
        let output = Arc::new(Mutex::new(Vec::<String>::new()));

        let stdout_handle = self.child.stdout.take().map(|out| {
            let sink = output.clone();
            thread::spawn(move || read_lines(out, &sink))
        });
        let stderr_handle = self.child.stderr.take().map(|err| {
            let sink = output.clone();
            thread::spawn(move || read_lines(err, &sink))
        });

        let deadline = timeout.map(|t| Instant::now() + t);

        let join_readers = |stdout_handle: Option<thread::JoinHandle<()>>,
                            stderr_handle: Option<thread::JoinHandle<()>>| {
            if let Some(h) = stdout_handle {
                let _ = h.join();
            }
            if let Some(h) = stderr_handle {
                let _ = h.join();
            }
        };

        loop {
            if cancel.is_cancelled() {
                let _ = self.child.kill();
                let _ = self.child.wait();
                join_readers(stdout_handle, stderr_handle);
                return Err(SpawnError::Cancelled);
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    join_readers(stdout_handle, stderr_handle);
                    return Err(SpawnError::Timeout(timeout.unwrap().as_secs()));
                }
            }

            match self.child.try_wait() {
                Ok(Some(status)) => {
                    join_readers(stdout_handle, stderr_handle);
                    let combined = output
                        .lock()
                        .expect("output mutex poisoned")
                        .join("\n");
                    return Ok((status.code(), combined));
                }
                Ok(None) => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    join_readers(stdout_handle, stderr_handle);
                    return Err(SpawnError::SpawnFailed(e));
                }
            }
        }
    }
}

fn read_lines<R: std::io::Read>(reader: R, sink: &Arc<Mutex<Vec<String>>>) {
    let reader = BufReader::new(reader);
    for line in reader.lines() {
        match line {
            Ok(content) => {
                sink.lock().expect("output mutex poisoned").push(content);
            }
            Err(_) => break,
        }
    }
}
