//! Example validation and agent-driven refinement.
//!
//! A candidate example is accepted when it imports the package under test
//! with a CommonJS `require` and runs cleanly with `node` inside a fresh
//! copy of the template project. Refinement repeats propose → validate with
//! corrective feedback until a candidate is accepted or the attempt budget
//! runs out.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

use dtsgen_core::fsutil;
use dtsgen_core::{PipelineError, Result};

use crate::agent::{truncate_chars, ExampleAgent};
use crate::context::RunContext;

/// Classification of one validated candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Ran cleanly; persisted when a destination was given.
    Accepted { output: String },

    /// The package is never required.
    MissingPrecondition,

    RuntimeError { exit_code: i32, output: String },

    TimedOut { output: String },

    /// There was nothing to validate.
    NoCandidate,
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted { .. })
    }

    /// Raw process output, if the candidate was executed.
    pub fn output(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Accepted { output }
            | ValidationOutcome::RuntimeError { output, .. }
            | ValidationOutcome::TimedOut { output } => Some(output),
            _ => None,
        }
    }
}

/// Checks candidate examples for one package.
pub struct Validator<'a> {
    run: RunContext<'a>,
    require: Regex,
}

impl<'a> Validator<'a> {
    pub fn new(run: RunContext<'a>) -> Result<Self> {
        let pattern = format!(
            r#"\brequire\s*\(\s*["'`]{}["'`]\s*\)"#,
            regex::escape(run.package)
        );
        let require = Regex::new(&pattern)
            .map_err(|err| PipelineError::unexpected(format!("invalid require pattern: {err}")))?;
        Ok(Self { run, require })
    }

    pub fn execution_timeout(&self) -> Duration {
        self.run.config.execution_timeout()
    }

    /// Whether `source` requires the package under test.
    pub fn has_require(&self, source: &str) -> bool {
        self.require.is_match(source)
    }

    /// Validate `candidate`, persisting it to `destination` when accepted.
    pub async fn validate(
        &self,
        candidate: Option<&str>,
        name: &str,
        destination: Option<&Path>,
    ) -> Result<ValidationOutcome> {
        let Some(example) = candidate else {
            return Ok(ValidationOutcome::NoCandidate);
        };
        let narrator = self.run.narrator;
        let _scope = narrator.enter(format!("Testing example {name}:"));
        self.run.show_file("Example content:", example);

        {
            let _check = narrator.enter("Checking import statements:");
            if !self.has_require(example) {
                narrator.write("Fail");
                return Ok(ValidationOutcome::MissingPrecondition);
            }
            narrator.write("Success");
        }

        let playground = self.run.fresh_playground()?;
        fsutil::write_file(&playground.join("index.js"), example)?;
        let _execution = narrator.enter("Running example with Node:");
        let invocation = self.run.execution_command("node index.js", &playground);
        let result = self.run.shell.run(&invocation, false).await?;
        if result.timed_out {
            narrator.write("Fail (timeout)");
            return Ok(ValidationOutcome::TimedOut {
                output: result.output,
            });
        }
        if result.exit_code != 0 {
            narrator.write("Fail");
            return Ok(ValidationOutcome::RuntimeError {
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        if let Some(destination) = destination {
            fsutil::write_file(destination, example)?;
        }
        narrator.write("Success");
        Ok(ValidationOutcome::Accepted {
            output: result.output,
        })
    }
}

/// Loop-local state of a refinement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinementState {
    /// Proposals requested so far.
    pub attempt: usize,

    /// Corrective messages sent to the agent, oldest first.
    pub feedback: Vec<String>,
}

/// How a refinement ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementOutcome {
    Accepted { path: PathBuf, state: RefinementState },

    /// Every attempt was rejected; not an error.
    Exhausted { state: RefinementState },
}

/// Bounds of a refinement.
#[derive(Debug, Clone, Copy)]
pub struct RefinementPolicy {
    pub max_attempts: usize,

    /// Longest process output quoted back to the agent.
    pub max_output_chars: usize,
}

/// Propose and validate examples until one is accepted.
///
/// Attempt `N` is persisted as `N.js` inside `output_dir`.
pub async fn refine(
    validator: &Validator<'_>,
    agent: &mut dyn ExampleAgent,
    output_dir: &Path,
    policy: RefinementPolicy,
) -> Result<RefinementOutcome> {
    let narrator = validator.run.narrator;
    let mut state = RefinementState::default();
    loop {
        let example = {
            let _scope = narrator.enter(format!("Generating example {}:", state.attempt));
            if state.attempt >= policy.max_attempts {
                narrator.write("Failed (too many attempts)");
                return Ok(RefinementOutcome::Exhausted { state });
            }
            match agent.propose().await {
                Ok(example) => {
                    narrator.write("Success");
                    example
                }
                Err(err) => {
                    let err = PipelineError::from(err);
                    if err.is_cancelled() {
                        return Err(err);
                    }
                    narrator.write(format!("Fail ({err})"));
                    state.attempt += 1;
                    let message = format!(
                        "Your previous reply could not be used ({err}). Reply with a single \
                         JavaScript example."
                    );
                    agent.feedback(&message);
                    state.feedback.push(message);
                    continue;
                }
            }
        };

        let name = format!("{}.js", state.attempt);
        let path = output_dir.join(&name);
        let outcome = {
            let _scope = narrator.enter(format!("Checking example {}:", state.attempt));
            validator
                .validate(Some(example.as_str()), &name, Some(&path))
                .await?
        };
        state.attempt += 1;

        let message = match outcome {
            ValidationOutcome::Accepted { .. } => {
                return Ok(RefinementOutcome::Accepted { path, state });
            }
            other => feedback_for(&other, validator, policy.max_output_chars),
        };
        agent.feedback(&message);
        state.feedback.push(message);
    }
}

/// Corrective instruction for a rejected candidate.
pub fn feedback_for(
    outcome: &ValidationOutcome,
    validator: &Validator<'_>,
    max_output_chars: usize,
) -> String {
    let package = validator.run.package;
    let seconds = validator.execution_timeout().as_secs();
    match outcome {
        ValidationOutcome::MissingPrecondition | ValidationOutcome::NoCandidate => format!(
            "Your example does not contain an import statement for the package, e.g. \
             \"require('{package}')\".\nAdd an import statement using the exact package name \
             \"{package}\"."
        ),
        ValidationOutcome::TimedOut { output } => format!(
            "Running your example with Node did not finish after {seconds} seconds:\n\
             ```shell\n{}\n```\nMake the example complete in under {seconds} seconds \
             without waiting for user input.",
            truncate_chars(output, max_output_chars)
        ),
        ValidationOutcome::RuntimeError { exit_code, output } => format!(
            "Running your example with Node failed with code {exit_code}:\n\
             ```shell\n{}\n```\nFix the error.",
            truncate_chars(output, max_output_chars)
        ),
        ValidationOutcome::Accepted { .. } => String::new(),
    }
}
