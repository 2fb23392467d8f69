//! External command execution.
//!
//! Every tool the pipeline drives (git, npm, node, the declaration scripts,
//! the prompting agent) is invoked through the [`Shell`] trait. The
//! production implementation is [`LocalShell`]; tests use
//! [`crate::fakes::ScriptedShell`].

mod cancel;
mod error;
mod local;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use cancel::CancelToken;
pub use error::{ShellError, ShellResult};
pub use local::LocalShell;

/// Exit code reported for timed out or cancelled commands (as GNU `timeout`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long a terminated process group gets between SIGTERM and SIGKILL.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// One command execution request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInvocation {
    /// Shell command line, run through `sh -c`.
    pub command: String,

    /// Working directory (inherited when `None`).
    pub cwd: Option<PathBuf>,

    /// Environment overrides layered on top of the inherited environment.
    pub env: Option<BTreeMap<String, String>>,

    /// Wall-clock limit; `None` waits forever.
    pub timeout: Option<Duration>,

    /// Whether the invocation and its output are narrated.
    pub verbose: bool,
}

impl ProcessInvocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Header line narrated before the command itself.
    pub fn describe(&self) -> String {
        let mut message = String::from("Shell");
        if let Some(timeout) = self.timeout {
            message.push_str(&format!(" (timeout: {}s)", timeout.as_secs_f64()));
        }
        if let Some(cwd) = &self.cwd {
            message.push_str(&format!(" (cwd: {})", cwd.display()));
        }
        if let Some(env) = &self.env {
            message.push_str(&format!(" (env: {env:?})"));
        }
        message.push(':');
        message
    }
}

/// Outcome of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Combined stdout and stderr, in arrival order.
    pub output: String,

    /// Exit code, [`TIMEOUT_EXIT_CODE`] when the command timed out.
    pub exit_code: i32,

    pub timed_out: bool,
}

impl ProcessResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: 0,
            timed_out: false,
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code,
            timed_out: false,
        }
    }

    pub fn timed_out(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
        }
    }

    /// Whether the command exited 0 within its limit.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Convert an unsuccessful result into the matching [`ShellError`].
    pub fn into_checked(self, invocation: &ProcessInvocation) -> ShellResult<Self> {
        if self.timed_out {
            return Err(ShellError::TimedOut {
                command: invocation.command.clone(),
                limit: invocation.timeout.unwrap_or_default(),
                output: self.output,
            });
        }
        if self.exit_code != 0 {
            return Err(ShellError::NonZeroExit {
                command: invocation.command.clone(),
                code: self.exit_code,
                output: self.output,
            });
        }
        Ok(self)
    }
}

/// Executes external commands.
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run a command to completion (or timeout) and report what happened.
    ///
    /// Only spawn failures and cancellation are errors here; a non-zero exit
    /// or a timeout is a normal [`ProcessResult`].
    async fn execute(&self, invocation: &ProcessInvocation) -> ShellResult<ProcessResult>;

    /// Run a command, optionally requiring a clean exit.
    ///
    /// With `must_succeed` a non-zero exit becomes
    /// [`ShellError::NonZeroExit`] and a timeout [`ShellError::TimedOut`].
    async fn run(
        &self,
        invocation: &ProcessInvocation,
        must_succeed: bool,
    ) -> ShellResult<ProcessResult> {
        let result = self.execute(invocation).await?;
        if must_succeed {
            result.into_checked(invocation)
        } else {
            Ok(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_options() {
        let invocation = ProcessInvocation::new("npm ci")
            .timeout(Duration::from_secs(600))
            .cwd("/tmp/build")
            .env("CI", "1");
        assert_eq!(
            invocation.describe(),
            "Shell (timeout: 600s) (cwd: /tmp/build) (env: {\"CI\": \"1\"}):"
        );
        assert_eq!(ProcessInvocation::new("ls").describe(), "Shell:");
    }

    #[test]
    fn test_into_checked_maps_failures() {
        let invocation = ProcessInvocation::new("node index.js").timeout(Duration::from_secs(60));

        let err = ProcessResult::timed_out("partial")
            .into_checked(&invocation)
            .unwrap_err();
        match err {
            ShellError::TimedOut { limit, output, .. } => {
                assert_eq!(limit, Duration::from_secs(60));
                assert_eq!(output, "partial");
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }

        let err = ProcessResult::failed(3, "oops")
            .into_checked(&invocation)
            .unwrap_err();
        assert!(matches!(err, ShellError::NonZeroExit { code: 3, .. }));

        let ok = ProcessResult::ok("fine").into_checked(&invocation).unwrap();
        assert!(ok.success());
    }

    #[test]
    fn test_timed_out_result_uses_conventional_code() {
        let result = ProcessResult::timed_out("");
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!result.success());
    }
}
