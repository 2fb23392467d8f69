//! Evaluation sweep: run the pipeline over a sample of DefinitelyTyped
//! packages and aggregate their status documents into metrics.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use dtsgen_core::fsutil;
use dtsgen_core::{
    unescape_package_name, BuildLayout, EvaluationLayout, FailureKind, Narrator, PipelineError,
    Shell,
};

use crate::agent::{AgentFactory, ProcessAgentFactory};
use crate::config::EvaluationConfig;
use crate::context::ToolContext;
use crate::metrics::{self, MetricsError, MetricsReport};
use crate::pipeline::PipelineController;
use crate::workspace;

/// Errors that end a sweep. Per-package taxonomy failures never do.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("evaluation I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize evaluation output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Asked whether the sweep goes on after an unexpected failure.
#[async_trait]
pub trait OperatorInput: Send + Sync {
    /// `true` to continue, `false` to abort the sweep.
    async fn acknowledge(&self) -> bool;
}

/// Waits for a line on stdin; end of input aborts.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinOperator;

#[async_trait]
impl OperatorInput for StdinOperator {
    async fn acknowledge(&self) -> bool {
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|read| read > 0)
        })
        .await;
        matches!(line, Ok(Ok(true)))
    }
}

/// Never pauses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContinue;

#[async_trait]
impl OperatorInput for AutoContinue {
    async fn acknowledge(&self) -> bool {
        true
    }
}

/// Tool versions and inputs recorded in `reproduction/info.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReproductionInfo {
    pub date: String,
    pub node: String,
    pub npm: String,
    pub git: String,
    pub docker: String,
    pub model: String,
    pub seed: Option<u64>,
    /// Revision of the DefinitelyTyped checkout.
    pub definitely_typed: String,
}

/// A package whose run ended in a taxonomy failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFailure {
    pub package: String,
    pub kind: FailureKind,
}

/// Outcome of a sweep.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    /// Packages eligible before slicing.
    pub available: usize,
    pub sampled: Vec<String>,
    pub failures: Vec<PackageFailure>,
    /// The operator stopped the sweep; no metrics were computed.
    pub aborted: bool,
    pub metrics: Option<MetricsReport>,
}

/// Non-empty, unscoped package directories of `types_dir`, sorted by name.
pub fn available_packages(types_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = fsutil::children(types_dir)?
        .into_iter()
        .filter(|path| path.is_dir() && !fsutil::dir_empty(path))
        .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        // Escaped scoped names are not supported by the declaration generator.
        .filter(|name| *name == unescape_package_name(name))
        .collect();
    names.sort();
    Ok(names)
}

/// Order `packages` deterministically by `seed`, or keep them as given.
pub fn shuffle(mut packages: Vec<String>, seed: Option<u64>) -> Vec<String> {
    if let Some(seed) = seed {
        packages.sort_by_cached_key(|name| {
            let mut hasher = Sha256::new();
            hasher.update(format!("{seed}:{name}"));
            hex::encode(hasher.finalize())
        });
    }
    packages
}

/// `packages[start..start + length]`, clamped to the population.
pub fn slice(packages: &[String], start: usize, length: Option<usize>) -> Vec<String> {
    let start = start.min(packages.len());
    let end = length.map_or(packages.len(), |length| {
        start.saturating_add(length).min(packages.len())
    });
    packages[start..end].to_vec()
}

/// Drives a sweep.
pub struct EvaluationDriver {
    shell: Arc<dyn Shell>,
    narrator: Narrator,
    config: EvaluationConfig,
    agents: Arc<dyn AgentFactory>,
    operator: Arc<dyn OperatorInput>,
}

impl EvaluationDriver {
    pub fn new(shell: Arc<dyn Shell>, narrator: Narrator, config: EvaluationConfig) -> Self {
        Self {
            shell,
            narrator,
            config,
            agents: Arc::new(ProcessAgentFactory),
            operator: Arc::new(StdinOperator),
        }
    }

    pub fn with_agents(mut self, agents: Arc<dyn AgentFactory>) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_operator(mut self, operator: Arc<dyn OperatorInput>) -> Self {
        self.operator = operator;
        self
    }

    pub async fn run(&self) -> Result<EvaluationReport, EvaluationError> {
        let narrator = &self.narrator;
        let config = &self.config;
        let pipeline = &config.pipeline;
        let layout = EvaluationLayout::new(&config.output_dir);
        let build = BuildLayout::new(&pipeline.build_dir);
        let tools = ToolContext {
            shell: self.shell.as_ref(),
            narrator,
            build: &build,
            config: pipeline,
        };

        fsutil::create_dir(&layout.logs_dir(), false)?;
        let transcript =
            std::fs::File::create(fsutil::unique_path(&layout.logs_dir().join("shell.txt")))?;
        let _sink = narrator.with_sink(transcript);
        let _scope = narrator.enter("Starting evaluation:");

        let (available, sampled) = {
            let _verbose = narrator.with_verbose(pipeline.verbose);
            workspace::build_definitely_typed(tools).await?;
            self.record_reproduction_info(tools, &layout).await?;

            let packages = available_packages(&build.definitely_typed_types())?;
            narrator.write("Removing packages with qualified names (not supported)");
            let packages = match config.seed {
                Some(seed) => {
                    narrator.write(format!("Packages are shuffled with seed {seed}"));
                    shuffle(packages, Some(seed))
                }
                None => {
                    narrator.write("Packages are sorted by name");
                    packages
                }
            };
            (packages.len(), slice(&packages, config.start, config.length))
        };
        let length = config.length.unwrap_or(available);
        narrator.write(format!(
            "Evaluating {} of {available} packages ({}-{})",
            sampled.len(),
            config.start,
            config.start.saturating_add(length)
        ));

        let controller =
            PipelineController::new(self.shell.clone(), narrator.clone(), pipeline.clone())
                .with_agents(self.agents.clone());
        let mut failures = Vec::new();
        for (offset, package) in sampled.iter().enumerate() {
            let _package_scope = narrator.enter(format!(
                "Evaluating package \"{package}\" (index: {}):",
                config.start + offset
            ));
            let err = match controller.run(package, &layout.package_root(package)).await {
                Ok(_) => continue,
                Err(err) => err,
            };
            let Some(kind) = err.kind() else {
                return Err(err.into());
            };
            failures.push(PackageFailure {
                package: package.clone(),
                kind,
            });
            if kind != FailureKind::Unexpected {
                narrator.write(format!("Caught generation failure of kind: {kind}"));
                continue;
            }
            narrator.write_block("Caught an unexpected failure:", err.to_string());
            if config.interactive {
                narrator.write_inline("Waiting for operator input: ");
                if !self.operator.acknowledge().await {
                    narrator.write(" Operator aborted");
                    return Ok(EvaluationReport {
                        available,
                        sampled,
                        failures,
                        aborted: true,
                        metrics: None,
                    });
                }
            }
        }

        let report = self.compute_metrics(&layout, &sampled)?;
        Ok(EvaluationReport {
            available,
            sampled,
            failures,
            aborted: false,
            metrics: Some(report),
        })
    }

    async fn record_reproduction_info(
        &self,
        tools: ToolContext<'_>,
        layout: &EvaluationLayout,
    ) -> Result<(), EvaluationError> {
        let checkout = tools.build.definitely_typed();
        let info = ReproductionInfo {
            date: chrono::Local::now().date_naive().to_string(),
            node: query(tools, "node --version", None).await?,
            npm: query(tools, "npm --version", None).await?,
            git: query(tools, "git --version", None).await?,
            docker: query(tools, "docker --version", None).await?,
            model: tools.config.agent.model.clone(),
            seed: self.config.seed,
            definitely_typed: query(tools, "git rev-parse HEAD", Some(&checkout)).await?,
        };
        let content = serde_json::to_string_pretty(&info)?;
        fsutil::write_file(&layout.reproduction_info(), &content)?;
        if tools.config.verbose_setup {
            self.narrator.write_block("Version data:", &content);
        }
        Ok(())
    }

    fn compute_metrics(
        &self,
        layout: &EvaluationLayout,
        packages: &[String],
    ) -> Result<MetricsReport, EvaluationError> {
        let narrator = &self.narrator;
        let _scope = narrator.enter("Computing metrics:");
        let report = MetricsReport::new(metrics::collect_absolute(layout, packages)?);
        report.write(&layout.metrics_dir())?;
        if self.config.verbose_statistics {
            narrator.write_block(
                "Absolute metrics:",
                serde_json::to_string_pretty(&report.absolute)?,
            );
            narrator.write_block(
                "Relative metrics:",
                serde_json::to_string_pretty(&report.relative)?,
            );
            narrator.write_block(
                "Baseline metrics:",
                serde_json::to_string_pretty(&report.baseline)?,
            );
        }
        Ok(report)
    }
}

/// Trimmed output of a version query; failures are recorded as their output.
async fn query(
    tools: ToolContext<'_>,
    command: &str,
    cwd: Option<&Path>,
) -> Result<String, PipelineError> {
    let mut invocation = tools.setup_command(command);
    if let Some(cwd) = cwd {
        invocation = invocation.cwd(cwd);
    }
    let result = tools.shell.run(&invocation, false).await?;
    Ok(result.output.trim().to_string())
}
