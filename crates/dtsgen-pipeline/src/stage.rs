//! Stage definitions and the per-mode artifact loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dtsgen_core::fsutil;
use dtsgen_core::obs;
use dtsgen_core::{Mode, Narrator, PipelineError, Result, RunLayout};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Runnable usage examples (`examples/<mode>/N.js`).
    Examples,

    /// Declarations derived from examples (`declarations/<mode>/N.d.ts`).
    Declarations,

    /// Scores against the reference declaration (`comparisons/<mode>/N.json`).
    Comparisons,
}

impl StageKind {
    pub const ORDER: [StageKind; 3] = [
        StageKind::Examples,
        StageKind::Declarations,
        StageKind::Comparisons,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Examples => "examples",
            StageKind::Declarations => "declarations",
            StageKind::Comparisons => "comparisons",
        }
    }

    /// Where this stage's artifacts for `mode` live.
    pub fn artifact_dir(&self, layout: &RunLayout, mode: Mode) -> PathBuf {
        match self {
            StageKind::Examples => layout.examples_dir(mode),
            StageKind::Declarations => layout.declarations_dir(mode),
            StageKind::Comparisons => layout.comparisons_dir(mode),
        }
    }

    /// The stage whose artifacts this one consumes. Examples are made from
    /// package data instead.
    pub fn source(&self) -> Option<StageKind> {
        match self {
            StageKind::Examples => None,
            StageKind::Declarations => Some(StageKind::Examples),
            StageKind::Comparisons => Some(StageKind::Declarations),
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            StageKind::Examples => "example(s)",
            StageKind::Declarations => "declaration(s)",
            StageKind::Comparisons => "comparison(s)",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What one stage produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub kind: StageKind,

    /// Persisted artifacts, in processing order.
    pub produced: Vec<PathBuf>,

    /// Inputs for which no artifact was produced.
    pub failed: Vec<PathBuf>,

    /// Modes without any input artifact.
    pub empty_modes: Vec<Mode>,
}

impl StageReport {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            produced: Vec::new(),
            failed: Vec::new(),
            empty_modes: Vec::new(),
        }
    }

    pub fn produced_count(&self) -> usize {
        self.produced.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Turns one input artifact into one output artifact.
#[async_trait]
pub trait ArtifactProducer: Send + Sync {
    /// Produce the artifact for `input` inside `output_dir`.
    ///
    /// `Ok(None)` means the input was rejected (already narrated by the
    /// producer). Errors are per-artifact as well, except cancellation.
    async fn produce(&self, mode: Mode, input: &Path, output_dir: &Path)
        -> Result<Option<PathBuf>>;
}

/// Drives an [`ArtifactProducer`] over every mode of a stage.
pub struct StageRunner<'a> {
    layout: &'a RunLayout,
    narrator: &'a Narrator,
}

impl<'a> StageRunner<'a> {
    pub fn new(layout: &'a RunLayout, narrator: &'a Narrator) -> Self {
        Self { layout, narrator }
    }

    /// Feed every input artifact of `modes` to `producer`.
    ///
    /// A failing artifact never affects its siblings or other modes; only
    /// cancellation ends the stage early.
    pub async fn run_stage(
        &self,
        kind: StageKind,
        modes: &[Mode],
        producer: &dyn ArtifactProducer,
    ) -> Result<StageReport> {
        let source = kind.source().ok_or_else(|| {
            PipelineError::unexpected(format!("stage {kind} has no input artifacts"))
        })?;
        let mut report = StageReport::new(kind);
        for &mode in modes {
            let inputs = fsutil::children(&source.artifact_dir(self.layout, mode))?;
            self.narrator
                .write(format!("Found {} {} for {mode}", inputs.len(), source.noun()));
            if inputs.is_empty() {
                report.empty_modes.push(mode);
                continue;
            }
            let output_dir = kind.artifact_dir(self.layout, mode);
            fsutil::create_dir(&output_dir, false)?;
            for input in inputs {
                match producer.produce(mode, &input, &output_dir).await {
                    Ok(Some(artifact)) if artifact.is_file() => report.produced.push(artifact),
                    Ok(Some(artifact)) => {
                        self.narrator
                            .write(format!("Fail ({} was not written)", artifact.display()));
                        report.failed.push(input);
                    }
                    Ok(None) => report.failed.push(input),
                    Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                    Err(err) => {
                        self.narrator.write(format!("Fail ({err})"));
                        report.failed.push(input);
                    }
                }
            }
        }
        obs::emit_stage_finished(kind.name(), report.produced_count(), report.failed_count());
        Ok(report)
    }
}
