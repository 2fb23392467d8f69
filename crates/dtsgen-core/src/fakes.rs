//! In-memory fakes for the process boundary (testing only).
//!
//! `ScriptedShell` answers commands from a rule table instead of spawning
//! processes. Rules match on a substring of the command line; handlers may
//! touch the filesystem to stand in for a tool's output files.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::shell::{ProcessInvocation, ProcessResult, Shell, ShellResult};

type Handler = Arc<dyn Fn(&ProcessInvocation) -> ShellResult<ProcessResult> + Send + Sync>;

// ---------------------------------------------------------------------------
// ScriptedShell
// ---------------------------------------------------------------------------

/// Shell fake driven by substring rules.
///
/// The most recently added matching rule wins. Commands without a matching
/// rule succeed with empty output.
#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<(String, Handler)>>,
    log: Mutex<Vec<ProcessInvocation>>,
}

impl std::fmt::Debug for ScriptedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedShell")
            .field("rules", &self.rules.lock().unwrap().len())
            .field("invocations", &self.invocation_count())
            .finish()
    }
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `handler`.
    pub fn on<F>(&self, pattern: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(&ProcessInvocation) -> ShellResult<ProcessResult> + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.into(), Arc::new(handler)));
        self
    }

    /// Answer commands containing `pattern` with a fixed result.
    pub fn on_result(&self, pattern: impl Into<String>, result: ProcessResult) -> &Self {
        self.on(pattern, move |_| Ok(result.clone()))
    }

    /// Every invocation received so far, in order.
    pub fn invocations(&self) -> Vec<ProcessInvocation> {
        self.log.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|invocation| invocation.command)
            .collect()
    }

    /// Number of invocations whose command contains `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|invocation| invocation.command.contains(pattern))
            .count()
    }
}

#[async_trait]
impl Shell for ScriptedShell {
    async fn execute(&self, invocation: &ProcessInvocation) -> ShellResult<ProcessResult> {
        self.log.lock().unwrap().push(invocation.clone());
        let handler = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(pattern, _)| invocation.command.contains(pattern.as_str()))
            .map(|(_, handler)| handler.clone());
        match handler {
            Some(handler) => handler(invocation),
            None => Ok(ProcessResult::ok("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellError;

    #[tokio::test]
    async fn test_latest_matching_rule_wins() {
        let shell = ScriptedShell::new();
        shell
            .on_result("node", ProcessResult::ok("first"))
            .on_result("node index.js", ProcessResult::failed(1, "second"));

        let result = shell
            .execute(&ProcessInvocation::new("node index.js"))
            .await
            .unwrap();
        assert_eq!(result.output, "second");

        let result = shell
            .execute(&ProcessInvocation::new("node --version"))
            .await
            .unwrap();
        assert_eq!(result.output, "first");
    }

    #[tokio::test]
    async fn test_unmatched_commands_succeed_and_are_recorded() {
        let shell = ScriptedShell::new();
        let result = shell
            .run(&ProcessInvocation::new("git --version"), true)
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(shell.commands(), ["git --version"]);
        assert_eq!(shell.count_matching("git"), 1);
    }

    #[tokio::test]
    async fn test_handlers_see_invocation() {
        let shell = ScriptedShell::new();
        shell.on("sleep", |invocation| {
            Err(ShellError::Cancelled {
                command: invocation.command.clone(),
            })
        });
        let err = shell
            .run(&ProcessInvocation::new("sleep 5"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::Cancelled { command } if command == "sleep 5"));
    }
}
