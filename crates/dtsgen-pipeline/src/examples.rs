//! The examples stage.
//!
//! Examples are produced from package data rather than from a previous
//! stage's artifacts:
//!
//! 1. clone the repository and collect package data (`has_*` flags);
//! 2. install the package into the template project;
//! 3. gate on CommonJS support (and optionally ES5 support);
//! 4. let the agent propose examples (`generation`), then extract fenced
//!    code blocks from the readme (`extraction`);
//! 5. combine each source into a single IIFE-wrapped candidate
//!    (`combined_*`).
//!
//! Agent generation runs first because a rejection is cheap to detect.

use std::path::{Path, PathBuf};

use regex::Regex;

use dtsgen_core::fsutil;
use dtsgen_core::obs;
use dtsgen_core::{Mode, PipelineError, ProcessInvocation, Result, StatusFlag};

use crate::agent::{AgentFactory, PackageContext, Screening};
use crate::context::RunContext;
use crate::stage::{StageKind, StageReport};
use crate::validation::{refine, RefinementOutcome, RefinementPolicy, ValidationOutcome, Validator};
use crate::workspace;

/// Fenced code blocks; the info string after the opening fence is skipped.
const CODE_BLOCK_PATTERN: &str = r"(?s)```.*?\n(.*?)```";

/// Trimmed bodies of the fenced code blocks in `markdown`, in order.
pub fn extract_code_blocks(markdown: &str) -> Result<Vec<String>> {
    let pattern = Regex::new(CODE_BLOCK_PATTERN)
        .map_err(|err| PipelineError::unexpected(format!("invalid code block pattern: {err}")))?;
    Ok(pattern
        .captures_iter(markdown)
        .filter_map(|captures| captures.get(1))
        .map(|body| body.as_str().trim().to_string())
        .collect())
}

/// Wrap `source` in an IIFE labelled with its origin.
pub fn wrap_example(origin: &str, source: &str) -> String {
    let body = source
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("// File: {origin}\n\n(function() {{\n{body}\n}})();")
}

/// Produces `examples/<mode>/N.js` for one run.
pub struct ExamplesStage<'a> {
    run: RunContext<'a>,
    agents: &'a dyn AgentFactory,
}

impl<'a> ExamplesStage<'a> {
    pub fn new(run: RunContext<'a>, agents: &'a dyn AgentFactory) -> Self {
        Self { run, agents }
    }

    pub async fn run(&self) -> Result<StageReport> {
        let run = self.run;
        let config = run.config;
        let narrator = run.narrator;
        let _scope = narrator.enter("Generating examples:");
        let mut report = StageReport::new(StageKind::Examples);

        workspace::clone_repository(run).await?;
        let context = workspace::collect_package_data(run)?;
        self.record_data_flags()?;
        if context.is_empty() {
            return Err(PipelineError::PackageDataMissing(
                "not enough package information found".to_string(),
            ));
        }
        workspace::build_template_project(run).await?;

        let validator = Validator::new(run)?;
        self.check_commonjs(&validator).await?;
        if config.check_es5 {
            self.check_es5().await?;
        }

        if config.generate_with_agent {
            let supported = match self.generate_with_agent(&validator, &context, &mut report).await {
                Ok(()) => true,
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                // A rejection only closes the generation branch.
                Err(err @ PipelineError::LlmRejected(_)) => {
                    if let Some(kind) = err.kind() {
                        run.status.set_flag(kind.status_flag(), true, true)?;
                    }
                    false
                }
                // Generation failures never block extraction.
                Err(err) => {
                    narrator.write(format!("Fail ({err})"));
                    true
                }
            };
            if supported && config.combine_examples {
                self.combine_into(
                    &validator,
                    "Combining generated examples:",
                    Mode::CombinedGeneration,
                    &[Mode::Generation],
                    &mut report,
                )
                .await?;
            }
        }

        if config.extract_from_readme {
            let extracted = self
                .extract_from_readme(&validator, context.readme.as_deref(), &mut report)
                .await?;
            if extracted && config.combine_examples {
                self.combine_into(
                    &validator,
                    "Combining extracted examples:",
                    Mode::CombinedExtraction,
                    &[Mode::Extraction],
                    &mut report,
                )
                .await?;
            }
        }

        if config.combine_examples {
            self.combine_into(
                &validator,
                "Combining all examples:",
                Mode::CombinedAll,
                &[Mode::Extraction, Mode::Generation],
                &mut report,
            )
            .await?;
        }

        report.empty_modes = Mode::ALL
            .into_iter()
            .filter(|mode| fsutil::dir_empty(&run.layout.examples_dir(*mode)))
            .collect();
        obs::emit_stage_finished(
            StageKind::Examples.name(),
            report.produced_count(),
            report.failed_count(),
        );
        Ok(report)
    }

    fn record_data_flags(&self) -> Result<()> {
        let layout = self.run.layout;
        let status = self.run.status;
        let flags = [
            (StatusFlag::HasRepository, !fsutil::dir_empty(&layout.repository_dir())),
            (StatusFlag::HasPackageJson, layout.package_json().is_file()),
            (StatusFlag::HasReadme, layout.readme().is_file()),
            (StatusFlag::HasMain, layout.main_file().is_file()),
            (StatusFlag::HasTests, !fsutil::dir_empty(&layout.tests_dir())),
        ];
        for (flag, value) in flags {
            status.set_flag(flag, value, true)?;
        }
        Ok(())
    }

    async fn check_commonjs(&self, validator: &Validator<'_>) -> Result<()> {
        let _scope = self.run.narrator.enter("Checking CommonJS support:");
        let entry = format!("const package = require(\"{}\");", self.run.package);
        match validator.validate(Some(entry.as_str()), "entry.js", None).await? {
            ValidationOutcome::RuntimeError { output, .. } | ValidationOutcome::TimedOut { output } => {
                Err(PipelineError::CommonJsUnsupported(format!(
                    "require statement fails on package with error:\n{}",
                    output.trim_end()
                )))
            }
            _ => Ok(()),
        }
    }

    async fn check_es5(&self) -> Result<()> {
        let run = self.run;
        let narrator = run.narrator;
        let _scope = narrator.enter("Checking ES5 support:");
        let playground = std::fs::canonicalize(run.fresh_playground()?)?;
        let entry = playground.join("entry.js");
        let bundle = playground.join("bundle.js");
        fsutil::write_file(&entry, format!("var package = require(\"{}\");", run.package))?;
        let invocation = ProcessInvocation::new(format!(
            "npx esbuild {} --outfile={} --bundle --target=es5 --platform=node --log-level=error",
            entry.display(),
            bundle.display()
        ))
        .cwd(&playground)
        .timeout(run.config.installation_timeout())
        .verbose(run.config.verbose_execution);
        let result = run.shell.run(&invocation, false).await?;
        if !result.success() {
            narrator.write("Fail");
            return Err(PipelineError::Es5Unsupported(
                "the package or one of its dependencies does not support ES5 syntax".to_string(),
            ));
        }
        narrator.write("Success");
        Ok(())
    }

    /// Screen the package, then refine agent proposals into
    /// `examples/generation`. A rejected package yields
    /// [`PipelineError::LlmRejected`].
    async fn generate_with_agent(
        &self,
        validator: &Validator<'_>,
        context: &PackageContext,
        report: &mut StageReport,
    ) -> Result<()> {
        let run = self.run;
        let narrator = run.narrator;
        let _scope = narrator.enter("Generating examples with the agent:");
        let output_dir = run.layout.examples_dir(Mode::Generation);
        fsutil::create_dir(&output_dir, false)?;

        let mut agent = self.agents.create(run, context)?;
        {
            let _screening = narrator.enter("Screening package:");
            if let Screening::Rejected { reason } = agent.screen().await? {
                narrator.write(format!("Rejected ({reason})"));
                return Err(PipelineError::LlmRejected(reason));
            }
            narrator.write("Supported");
        }

        let policy = RefinementPolicy {
            max_attempts: run.config.max_attempts,
            max_output_chars: run.config.max_prompt_chars,
        };
        match refine(validator, agent.as_mut(), &output_dir, policy).await? {
            RefinementOutcome::Accepted { path, .. } => report.produced.push(path),
            RefinementOutcome::Exhausted { .. } => report.failed.push(output_dir),
        }
        Ok(())
    }

    /// Validate every readme code block into `examples/extraction`. Returns
    /// `false` when there was no readme to extract from.
    async fn extract_from_readme(
        &self,
        validator: &Validator<'_>,
        readme: Option<&str>,
        report: &mut StageReport,
    ) -> Result<bool> {
        let narrator = self.run.narrator;
        let _scope = narrator.enter("Extracting examples from the readme file:");
        let Some(readme) = readme else {
            narrator.write("No readme file available for extraction");
            return Ok(false);
        };
        let output_dir = self.run.layout.examples_dir(Mode::Extraction);
        fsutil::create_dir(&output_dir, false)?;
        let examples = extract_code_blocks(readme)?;
        narrator.write(format!("Found {} example(s)", examples.len()));
        for (index, example) in examples.iter().enumerate() {
            let name = format!("{index}.js");
            let destination = output_dir.join(&name);
            let outcome = validator
                .validate(Some(example.as_str()), &name, Some(&destination))
                .await?;
            record(report, &outcome, destination);
        }
        Ok(true)
    }

    /// Combine the examples of `sources` and validate the result into
    /// `examples/<mode>/0.js`.
    async fn combine_into(
        &self,
        validator: &Validator<'_>,
        label: &str,
        mode: Mode,
        sources: &[Mode],
        report: &mut StageReport,
    ) -> Result<()> {
        let layout = self.run.layout;
        let _scope = self.run.narrator.enter(label);
        let mut files = Vec::new();
        for source in sources {
            files.extend(fsutil::children(&layout.examples_dir(*source))?);
        }
        let candidate = self.combine(&files)?;
        let output_dir = layout.examples_dir(mode);
        fsutil::create_dir(&output_dir, false)?;
        let destination = output_dir.join("0.js");
        let outcome = validator
            .validate(candidate.as_deref(), "0.js", Some(&destination))
            .await?;
        record(report, &outcome, destination);
        Ok(())
    }

    fn combine(&self, files: &[PathBuf]) -> Result<Option<String>> {
        let narrator = self.run.narrator;
        let _scope = narrator.enter("Combining examples:");
        if files.is_empty() {
            narrator.write("No examples found");
            return Ok(None);
        }
        let root = self.run.layout.root();
        let mut parts = Vec::with_capacity(files.len());
        for file in files {
            let content = std::fs::read_to_string(file)?;
            parts.push(wrap_example(&origin(root, file), &content));
        }
        narrator.write("Success");
        Ok(Some(parts.join("\n\n")))
    }
}

fn origin(root: &Path, file: &Path) -> String {
    file.strip_prefix(root)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}

fn record(report: &mut StageReport, outcome: &ValidationOutcome, destination: PathBuf) {
    match outcome {
        ValidationOutcome::Accepted { .. } => report.produced.push(destination),
        ValidationOutcome::NoCandidate => {}
        _ => report.failed.push(destination),
    }
}
