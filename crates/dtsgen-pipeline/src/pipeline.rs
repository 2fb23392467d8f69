//! Run orchestration: one package, every requested stage, durable status.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use dtsgen_core::fsutil;
use dtsgen_core::obs::{self, RunSpan};
use dtsgen_core::status::FAILURE_MESSAGE_KEY;
use dtsgen_core::{
    AssetsLayout, BuildLayout, FailureKind, Mode, Narrator, PipelineError, Result, RunLayout,
    Shell, StatusError, StatusFlag, StatusStore,
};

use crate::agent::{AgentFactory, ProcessAgentFactory};
use crate::comparisons::generate_comparisons;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::declarations::generate_declarations;
use crate::examples::ExamplesStage;
use crate::stage::StageReport;

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed(FailureKind),
}

impl RunOutcome {
    /// The status flag this outcome sets.
    pub fn status_flag(self) -> StatusFlag {
        match self {
            RunOutcome::Succeeded => StatusFlag::Usable,
            RunOutcome::Failed(kind) => kind.status_flag(),
        }
    }
}

/// Lifecycle of a run. Stage states are only entered when the stage is
/// enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Preparing,
    Examples,
    Declarations,
    Comparisons,
    Finished(RunOutcome),
}

/// Result of a run that did not fail.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,

    /// States passed through, in order.
    pub transitions: Vec<RunState>,

    /// Reports of the stages that ran.
    pub stages: Vec<StageReport>,

    /// A finished result existed already; nothing was executed.
    pub skipped: bool,

    pub duration_ms: u64,
}

impl RunReport {
    pub fn final_state(&self) -> Option<RunState> {
        self.transitions.last().copied()
    }
}

/// Drives one package through the pipeline.
pub struct PipelineController {
    shell: Arc<dyn Shell>,
    narrator: Narrator,
    config: PipelineConfig,
    agents: Arc<dyn AgentFactory>,
}

impl PipelineController {
    /// Controller using the process-backed prompting agent.
    pub fn new(shell: Arc<dyn Shell>, narrator: Narrator, config: PipelineConfig) -> Self {
        Self {
            shell,
            narrator,
            config,
            agents: Arc::new(ProcessAgentFactory),
        }
    }

    pub fn with_agents(mut self, agents: Arc<dyn AgentFactory>) -> Self {
        self.agents = agents;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    /// Run `package` with `root` as its output root.
    ///
    /// A root holding a finished run is left untouched unless `overwrite`
    /// is set. Taxonomy errors are recorded in the status document and
    /// returned; cancellation is returned without marking the run finished,
    /// so the next attempt starts over.
    pub async fn run(&self, package: &str, root: &Path) -> Result<RunReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let _span = RunSpan::enter(package, &run_id);
        let narrator = &self.narrator;
        let layout = RunLayout::new(root);
        let status = StatusStore::new(layout.status_path());
        let mut transitions = vec![RunState::NotStarted, RunState::Preparing];

        if self.config.overwrite {
            fsutil::remove_dir_all(root)?;
        } else if status.is_finished().unwrap_or(false) {
            narrator.write(format!(
                "Skipping generation for \"{package}\" (already generated)"
            ));
            obs::emit_run_skipped(package);
            transitions.push(RunState::Finished(RunOutcome::Succeeded));
            return Ok(RunReport {
                run_id,
                transitions,
                stages: Vec::new(),
                skipped: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        } else {
            // Leftovers of an interrupted run; anything else in the root is kept.
            for dir in layout.owned_dirs() {
                fsutil::remove_dir_all(&dir)?;
            }
        }
        for dir in layout.stage_dirs() {
            fsutil::create_dir(&dir, false)?;
        }
        status.initialize_baseline()?;

        let build = BuildLayout::new(&self.config.build_dir);
        let assets = AssetsLayout::new(&self.config.assets_dir);
        let run = RunContext {
            package,
            shell: self.shell.as_ref(),
            narrator,
            layout: &layout,
            build: &build,
            assets: &assets,
            status: &status,
            config: &self.config,
        };

        let transcript = std::fs::File::create(layout.shell_log())?;
        let _sink = narrator.with_sink(transcript);
        let _scope = narrator.enter(format!("Starting generation for \"{package}\":"));
        let modes: Vec<&str> = Mode::selection(self.config.combined_only)
            .iter()
            .map(Mode::dir_name)
            .collect();
        obs::emit_run_started(package, &modes);
        let finalize = Finalize {
            narrator: narrator.clone(),
            package: package.to_string(),
            cache_dir: layout.cache_dir(),
            remove_cache: self.config.remove_cache,
        };

        let mut stages = Vec::new();
        let result = {
            let _verbose = narrator.with_verbose(self.config.verbose);
            self.run_stages(run, &mut transitions, &mut stages).await
        };

        let outcome = match &result {
            Ok(()) => Some(RunOutcome::Succeeded),
            Err(err) => err.kind().map(RunOutcome::Failed),
        };
        let bookkeeping = match outcome {
            Some(outcome) => record_outcome(&status, outcome, result.as_ref().err()),
            None => Ok(()),
        };
        drop(finalize);

        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome_key = outcome.map_or("cancelled", |outcome| outcome.status_flag().key());
        obs::emit_run_finished(package, duration_ms, outcome_key);
        if let Some(outcome) = outcome {
            transitions.push(RunState::Finished(outcome));
        }
        debug!(package = %package, transitions = ?transitions, "run transitions");

        match (result, bookkeeping) {
            (Err(err), Err(status_err)) => {
                obs::emit_cleanup_error(package, &status_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(status_err)) => Err(status_err.into()),
            (Ok(()), Ok(())) => Ok(RunReport {
                run_id,
                transitions,
                stages,
                skipped: false,
                duration_ms,
            }),
        }
    }

    async fn run_stages(
        &self,
        run: RunContext<'_>,
        transitions: &mut Vec<RunState>,
        stages: &mut Vec<StageReport>,
    ) -> Result<()> {
        if self.config.generate_examples {
            transitions.push(RunState::Examples);
            stages.push(ExamplesStage::new(run, self.agents.as_ref()).run().await?);
        }
        if self.config.generate_declarations {
            transitions.push(RunState::Declarations);
            stages.push(generate_declarations(run).await?);
        }
        if self.config.generate_comparisons {
            transitions.push(RunState::Comparisons);
            stages.push(generate_comparisons(run).await?);
        }
        Ok(())
    }
}

/// Persist the outcome flag, the failure message and `finished`.
fn record_outcome(
    status: &StatusStore,
    outcome: RunOutcome,
    error: Option<&PipelineError>,
) -> std::result::Result<(), StatusError> {
    status.set_flag(outcome.status_flag(), true, true)?;
    if let Some(error) = error {
        status.set(FAILURE_MESSAGE_KEY, error.to_string(), false)?;
    }
    status.set_flag(StatusFlag::Finished, true, true)
}

/// Closing step of a run; runs on every exit path, including a dropped
/// future.
struct Finalize {
    narrator: Narrator,
    package: String,
    cache_dir: std::path::PathBuf,
    remove_cache: bool,
}

impl Drop for Finalize {
    fn drop(&mut self) {
        self.narrator
            .write(format!("Finished generation for \"{}\"", self.package));
        if self.remove_cache {
            if let Err(err) = fsutil::remove_dir_all(&self.cache_dir) {
                obs::emit_cleanup_error(&self.package, &err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtsgen_core::fakes::ScriptedShell;
    use dtsgen_core::{ProcessResult, SharedBuffer};
    use tempfile::tempdir;

    fn config(build: &Path) -> PipelineConfig {
        PipelineConfig {
            build_dir: build.to_path_buf(),
            generate_with_agent: false,
            generate_declarations: false,
            overwrite: false,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_repository_is_recorded() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(ScriptedShell::new());
        shell.on_result("npm view", ProcessResult::failed(1, "E404"));
        let buffer = SharedBuffer::new();
        let narrator = Narrator::silent();
        let _sink = narrator.with_sink(buffer.clone());
        let controller =
            PipelineController::new(shell.clone(), narrator, config(&dir.path().join("builds")));
        let root = dir.path().join("run");

        let err = controller.run("abs", &root).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::PackageDataMissing));

        let status = StatusStore::new(RunLayout::new(&root).status_path());
        assert!(status.flag(StatusFlag::PackageDataMissing).unwrap());
        assert!(!status.flag(StatusFlag::Usable).unwrap());
        assert!(status.is_finished().unwrap());
        let message = status.get(FAILURE_MESSAGE_KEY, true, None).unwrap().unwrap();
        assert!(message.as_str().unwrap().contains("npm view failed"));

        let transcript = buffer.contents();
        assert!(transcript.starts_with("Starting generation for \"abs\":\n"));
        assert!(transcript.ends_with("  Finished generation for \"abs\"\n"));
        let log = std::fs::read_to_string(RunLayout::new(&root).shell_log()).unwrap();
        assert_eq!(log, transcript);
    }

    #[tokio::test]
    async fn test_disabled_stages_only_prepare() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(ScriptedShell::new());
        let controller = PipelineController::new(
            shell.clone(),
            Narrator::silent(),
            PipelineConfig {
                generate_examples: false,
                ..config(&dir.path().join("builds"))
            },
        );
        let report = controller.run("abs", &dir.path().join("run")).await.unwrap();
        assert_eq!(
            report.transitions,
            vec![
                RunState::NotStarted,
                RunState::Preparing,
                RunState::Finished(RunOutcome::Succeeded)
            ]
        );
        assert!(!report.skipped);
        assert_eq!(shell.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_cache_on_failure() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(ScriptedShell::new());
        shell.on_result("npm view", ProcessResult::ok(""));
        let controller = PipelineController::new(
            shell,
            Narrator::silent(),
            PipelineConfig {
                remove_cache: true,
                ..config(&dir.path().join("builds"))
            },
        );
        let root = dir.path().join("run");
        controller.run("abs", &root).await.unwrap_err();
        assert!(!RunLayout::new(&root).cache_dir().exists());
        assert!(RunLayout::new(&root).status_path().is_file());
    }
}
