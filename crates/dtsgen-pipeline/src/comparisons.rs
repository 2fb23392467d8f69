//! The comparisons stage: generated declaration vs. DefinitelyTyped.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dtsgen_core::fsutil;
use dtsgen_core::{Mode, PipelineError, Result};

use crate::context::RunContext;
use crate::stage::{ArtifactProducer, StageKind, StageReport, StageRunner};
use crate::workspace;

/// Scores written by the comparison script to `comparison.json`.
///
/// The fractions depend on how the package exports its API; only whether
/// they reach 100% is meaningful, hence the `is_*` flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub soundness: f64,
    pub completeness: f64,
    pub equivalence: f64,
    pub is_sound: bool,
    pub is_complete: bool,
    pub is_equivalent: bool,
}

/// `0.5` → `"50.00%"`.
pub fn percent(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

/// Runs the comparison script on one declaration.
pub struct ComparisonProducer<'a> {
    run: RunContext<'a>,
    reference: PathBuf,
}

impl<'a> ComparisonProducer<'a> {
    pub fn new(run: RunContext<'a>, reference: PathBuf) -> Self {
        Self { run, reference }
    }
}

#[async_trait]
impl ArtifactProducer for ComparisonProducer<'_> {
    async fn produce(
        &self,
        _mode: Mode,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let run = self.run;
        let narrator = run.narrator;
        let name = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _scope = narrator.enter(format!("Generating comparisons for {name}:"));
        if run.config.verbose_files {
            run.show_file("Declaration content:", &std::fs::read_to_string(input)?);
        }

        let playground = run.fresh_playground()?;
        let scripts = run.assets.comparison_scripts();
        std::fs::copy(input, playground.join("index.d.ts"))?;
        std::fs::copy(input, playground.join("predicted.d.ts"))?;
        std::fs::copy(&self.reference, playground.join("expected.d.ts"))?;
        for script in ["compare.ts", "tsconfig.json"] {
            std::fs::copy(scripts.join(script), playground.join(script))?;
        }

        let _compare =
            narrator.enter("Comparing generated declaration to DefinitelyTyped declaration:");
        let invocation = run.execution_command("npx tsx compare.ts", &playground);
        let result = run.shell.run(&invocation, false).await?;
        let comparison_path = playground.join("comparison.json");
        if !result.success() || !fsutil::file_nonempty(&comparison_path) {
            narrator.write("Fail");
            return Ok(None);
        }
        let content = std::fs::read_to_string(&comparison_path)?;
        run.show_file("Comparison content:", &content);
        let comparison: ComparisonResult = match serde_json::from_str(&content) {
            Ok(comparison) => comparison,
            Err(err) => {
                narrator.write(format!("Fail (malformed comparison: {err})"));
                return Ok(None);
            }
        };

        let output = output_dir.join(name.replace(".d.ts", ".json"));
        fsutil::write_file(&output, &content)?;
        narrator.write(format!("Soundness: {}", percent(comparison.soundness)));
        narrator.write(format!("Completeness: {}", percent(comparison.completeness)));
        narrator.write(format!("Equivalence: {}", percent(comparison.equivalence)));
        Ok(Some(output))
    }
}

/// Score every declaration against the package's DefinitelyTyped entry.
pub async fn generate_comparisons(run: RunContext<'_>) -> Result<StageReport> {
    let _scope = run.narrator.enter("Generating comparisons:");
    workspace::build_definitely_typed(run.tools()).await?;
    workspace::build_template_project(run).await?;

    let reference = run.build.reference_declaration(run.package);
    // Packages come from DefinitelyTyped, so a missing entry is a broken checkout.
    if !reference.is_file() {
        return Err(PipelineError::unexpected(format!(
            "no DefinitelyTyped declaration at {}",
            reference.display()
        )));
    }
    if run.config.verbose_files {
        let content = std::fs::read_to_string(&reference)?;
        run.show_file("DefinitelyTyped declaration content:", content.trim());
    }

    let producer = ComparisonProducer::new(run, reference);
    StageRunner::new(run.layout, run.narrator)
        .run_stage(
            StageKind::Comparisons,
            Mode::selection(run.config.combined_only),
            &producer,
        )
        .await
}
