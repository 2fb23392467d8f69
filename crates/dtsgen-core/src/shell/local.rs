//! Process runner backed by `sh -c` and tokio.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{
    CancelToken, ProcessInvocation, ProcessResult, Shell, ShellError, ShellResult,
    TERMINATION_GRACE, TIMEOUT_EXIT_CODE,
};
use crate::narrator::Narrator;
use crate::obs;

/// Time left for buffered output once the process group is gone.
const READER_FLUSH: Duration = Duration::from_millis(50);

/// Runs commands on the local machine.
///
/// Each command becomes the leader of a fresh process group, so timeouts and
/// cancellation can take down everything it spawned.
#[derive(Debug, Clone)]
pub struct LocalShell {
    narrator: Narrator,
    cancel: CancelToken,
}

enum Completion {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

impl LocalShell {
    pub fn new(narrator: Narrator) -> Self {
        Self {
            narrator,
            cancel: CancelToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }
}

#[async_trait]
impl Shell for LocalShell {
    async fn execute(&self, invocation: &ProcessInvocation) -> ShellResult<ProcessResult> {
        let _verbosity = self.narrator.with_verbose(invocation.verbose);
        let _scope = self.narrator.enter(invocation.describe());
        self.narrator.write(&invocation.command);

        if self.cancel.is_cancelled() {
            return Err(ShellError::Cancelled {
                command: invocation.command.clone(),
            });
        }

        let start = Instant::now();
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&invocation.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        if let Some(env) = &invocation.env {
            command.envs(env);
        }

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            command: invocation.command.clone(),
            source,
        })?;
        let group = child.id().map(|pid| pid as libc::pid_t);

        let captured = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(drain(stdout, self.narrator.clone(), captured.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(drain(stderr, self.narrator.clone(), captured.clone()));
        }

        let limit = invocation.timeout;
        let completion = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Completion::Exited(status),
                Err(source) => {
                    let deadline = Instant::now() + TERMINATION_GRACE;
                    terminate(&mut child, group).await;
                    settle_readers(readers, deadline).await;
                    return Err(ShellError::Io { command: invocation.command.clone(), source });
                }
            },
            _ = sleep_for(limit) => Completion::TimedOut,
            _ = self.cancel.cancelled() => Completion::Cancelled,
        };

        let (exit_code, timed_out) = match completion {
            Completion::Exited(status) => {
                // Stragglers still holding our pipes would block the readers.
                if !readers_finish_within(&readers, TERMINATION_GRACE).await {
                    signal_group(group, libc::SIGKILL);
                }
                settle_readers(readers, Instant::now()).await;
                (exit_code_of(status), false)
            }
            Completion::TimedOut => {
                let deadline = Instant::now() + TERMINATION_GRACE;
                terminate(&mut child, group).await;
                settle_readers(readers, deadline).await;
                (TIMEOUT_EXIT_CODE, true)
            }
            Completion::Cancelled => {
                let deadline = Instant::now() + TERMINATION_GRACE;
                terminate(&mut child, group).await;
                settle_readers(readers, deadline).await;
                obs::emit_process_finished(
                    &invocation.command,
                    TIMEOUT_EXIT_CODE,
                    true,
                    start.elapsed().as_millis() as u64,
                );
                return Err(ShellError::Cancelled {
                    command: invocation.command.clone(),
                });
            }
        };

        let output = std::mem::take(&mut *captured.lock().unwrap_or_else(|p| p.into_inner()));
        obs::emit_process_finished(
            &invocation.command,
            exit_code,
            timed_out,
            start.elapsed().as_millis() as u64,
        );
        Ok(ProcessResult {
            output,
            exit_code,
            timed_out,
        })
    }
}

async fn sleep_for(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

/// Stream `stream` line by line into the narrator and the capture buffer.
fn drain<R>(stream: R, narrator: Narrator, captured: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    narrator.write_inline(&line);
                    captured
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .push_str(&line);
                }
            }
        }
    })
}

async fn join_readers(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.await;
    }
}

/// Wait up to `limit` for every reader to hit EOF, without consuming them.
async fn readers_finish_within(readers: &[JoinHandle<()>], limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while !readers.iter().all(|reader| reader.is_finished()) {
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    true
}

/// Give the readers until `deadline` to reach EOF, then abort the rest.
///
/// Descendants that left the process group (`setsid`) survive the group
/// kill and can hold our pipes open indefinitely; their output after this
/// point is dropped.
async fn settle_readers(readers: Vec<JoinHandle<()>>, deadline: Instant) {
    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(READER_FLUSH);
    if !readers_finish_within(&readers, remaining).await {
        for reader in &readers {
            reader.abort();
        }
    }
    join_readers(readers).await;
}

/// SIGTERM the group, give it the grace window, then SIGKILL whatever is left.
async fn terminate(child: &mut Child, group: Option<libc::pid_t>) {
    signal_group(group, libc::SIGTERM);
    if tokio::time::timeout(TERMINATION_GRACE, child.wait())
        .await
        .is_err()
    {
        signal_group(group, libc::SIGKILL);
        let _ = child.wait().await;
    }
    // Members that ignored SIGTERM outlive the leader; sweep them too.
    signal_group(group, libc::SIGKILL);
}

fn signal_group(group: Option<libc::pid_t>, signal: libc::c_int) {
    if let Some(group) = group {
        // SAFETY: killpg has no memory-safety preconditions; ESRCH for an
        // already empty group is expected and ignored.
        unsafe {
            libc::killpg(group, signal);
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
