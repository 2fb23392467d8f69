//! Aggregation of per-run outcomes into evaluation metrics.
//!
//! Three documents are produced in `metrics/`:
//!
//! - `absolute_metrics.json`: counts over every sampled package;
//! - `relative_metrics.json`: per combined mode, each count as a share of
//!   the usable packages;
//! - `baseline_metrics.json`: `combined_generation` and `combined_all` as a
//!   change relative to `combined_extraction`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dtsgen_core::fsutil;
use dtsgen_core::{EvaluationLayout, Mode, RunLayout, StatusError, StatusFlag, StatusStore};

use crate::comparisons::{percent, ComparisonResult};

/// Errors raised while aggregating metrics.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("status of {package} is unreadable: {source}")]
    Status {
        package: String,
        #[source]
        source: StatusError,
    },

    #[error("expected at most one comparison for {package} in {mode}, found {count}")]
    TooManyComparisons {
        package: String,
        mode: Mode,
        count: usize,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed comparison {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for metrics operations.
pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Per-mode counters (or their derived percentages).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeMetrics<T = usize> {
    pub sound: T,
    pub complete: T,
    pub equivalent: T,
    pub examples_generated: T,
    pub declarations_generated: T,
    pub comparisons_generated: T,
}

impl<T> ModeMetrics<T> {
    fn zip_map<U>(&self, other: &Self, f: impl Fn(&T, &T) -> U) -> ModeMetrics<U> {
        ModeMetrics {
            sound: f(&self.sound, &other.sound),
            complete: f(&self.complete, &other.complete),
            equivalent: f(&self.equivalent, &other.equivalent),
            examples_generated: f(&self.examples_generated, &other.examples_generated),
            declarations_generated: f(&self.declarations_generated, &other.declarations_generated),
            comparisons_generated: f(&self.comparisons_generated, &other.comparisons_generated),
        }
    }

    fn map<U>(&self, f: impl Fn(&T) -> U) -> ModeMetrics<U> {
        self.zip_map(self, |value, _| f(value))
    }
}

/// Counts over every sampled package.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbsoluteMetrics {
    pub total: usize,
    pub usable: usize,
    pub package_data_missing: usize,
    pub package_installation_failed: usize,
    pub commonjs_unsupported: usize,
    pub es5_unsupported: usize,
    pub unexpected_failure: usize,
    pub llm_rejected: usize,
    pub has_repository: usize,
    pub has_package_json: usize,
    pub has_readme: usize,
    pub has_main: usize,
    pub has_tests: usize,
    pub combined_extraction: ModeMetrics,
    pub combined_generation: ModeMetrics,
    pub combined_all: ModeMetrics,
}

impl AbsoluteMetrics {
    /// Counters of a combined mode; `None` for basic modes.
    pub fn mode(&self, mode: Mode) -> Option<&ModeMetrics> {
        match mode {
            Mode::CombinedExtraction => Some(&self.combined_extraction),
            Mode::CombinedGeneration => Some(&self.combined_generation),
            Mode::CombinedAll => Some(&self.combined_all),
            Mode::Extraction | Mode::Generation => None,
        }
    }

    fn mode_mut(&mut self, mode: Mode) -> Option<&mut ModeMetrics> {
        match mode {
            Mode::CombinedExtraction => Some(&mut self.combined_extraction),
            Mode::CombinedGeneration => Some(&mut self.combined_generation),
            Mode::CombinedAll => Some(&mut self.combined_all),
            Mode::Extraction | Mode::Generation => None,
        }
    }

    fn flag_counter(&mut self, flag: StatusFlag) -> Option<&mut usize> {
        Some(match flag {
            StatusFlag::Usable => &mut self.usable,
            StatusFlag::PackageDataMissing => &mut self.package_data_missing,
            StatusFlag::PackageInstallationFailed => &mut self.package_installation_failed,
            StatusFlag::CommonjsUnsupported => &mut self.commonjs_unsupported,
            StatusFlag::Es5Unsupported => &mut self.es5_unsupported,
            StatusFlag::UnexpectedFailure => &mut self.unexpected_failure,
            StatusFlag::LlmRejected => &mut self.llm_rejected,
            StatusFlag::HasRepository => &mut self.has_repository,
            StatusFlag::HasPackageJson => &mut self.has_package_json,
            StatusFlag::HasReadme => &mut self.has_readme,
            StatusFlag::HasMain => &mut self.has_main,
            StatusFlag::HasTests => &mut self.has_tests,
            StatusFlag::Finished => return None,
        })
    }
}

/// Each combined mode's counters as a share of the usable packages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelativeMetrics {
    pub combined_extraction: ModeMetrics<String>,
    pub combined_generation: ModeMetrics<String>,
    pub combined_all: ModeMetrics<String>,
}

/// Change of the other combined modes relative to `combined_extraction`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaselineMetrics {
    pub combined_generation: ModeMetrics<String>,
    pub combined_all: ModeMetrics<String>,
}

/// All three metric documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsReport {
    pub absolute: AbsoluteMetrics,
    pub relative: RelativeMetrics,
    pub baseline: BaselineMetrics,
}

impl MetricsReport {
    pub fn new(absolute: AbsoluteMetrics) -> Self {
        let relative = relative_metrics(&absolute);
        let baseline = baseline_metrics(&absolute);
        Self {
            absolute,
            relative,
            baseline,
        }
    }

    /// Write the three documents into `dir`.
    pub fn write(&self, dir: &Path) -> MetricsResult<()> {
        write_json(&dir.join("absolute_metrics.json"), &self.absolute)?;
        write_json(&dir.join("relative_metrics.json"), &self.relative)?;
        write_json(&dir.join("baseline_metrics.json"), &self.baseline)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> MetricsResult<()> {
    let content = serde_json::to_string_pretty(value).map_err(|source| MetricsError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fsutil::write_file(path, content).map_err(|source| MetricsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Count outcomes and artifacts of `packages` inside an evaluation.
pub fn collect_absolute(
    evaluation: &EvaluationLayout,
    packages: &[String],
) -> MetricsResult<AbsoluteMetrics> {
    let mut metrics = AbsoluteMetrics {
        total: packages.len(),
        ..AbsoluteMetrics::default()
    };
    for package in packages {
        let layout = RunLayout::new(evaluation.package_root(package));
        let status = StatusStore::new(layout.status_path());
        for flag in StatusFlag::OUTCOMES.into_iter().chain(StatusFlag::DATA) {
            let value = status.flag(flag).map_err(|source| MetricsError::Status {
                package: package.clone(),
                source,
            })?;
            if let Some(counter) = metrics.flag_counter(flag) {
                *counter += usize::from(value);
            }
        }
        for mode in Mode::COMBINED {
            let counters = count_mode(&layout, package, mode)?;
            if let Some(total) = metrics.mode_mut(mode) {
                *total = total.zip_map(&counters, |a, b| a + b);
            }
        }
    }
    Ok(metrics)
}

fn count_mode(layout: &RunLayout, package: &str, mode: Mode) -> MetricsResult<ModeMetrics> {
    let comparisons_dir = layout.comparisons_dir(mode);
    let mut counters = ModeMetrics {
        examples_generated: usize::from(!fsutil::dir_empty(&layout.examples_dir(mode))),
        declarations_generated: usize::from(!fsutil::dir_empty(&layout.declarations_dir(mode))),
        comparisons_generated: usize::from(!fsutil::dir_empty(&comparisons_dir)),
        ..ModeMetrics::default()
    };
    let comparisons = fsutil::children(&comparisons_dir).map_err(|source| MetricsError::Io {
        path: comparisons_dir.clone(),
        source,
    })?;
    if comparisons.len() > 1 {
        return Err(MetricsError::TooManyComparisons {
            package: package.to_string(),
            mode,
            count: comparisons.len(),
        });
    }
    for path in comparisons {
        let content = std::fs::read_to_string(&path).map_err(|source| MetricsError::Io {
            path: path.clone(),
            source,
        })?;
        let comparison: ComparisonResult =
            serde_json::from_str(&content).map_err(|source| MetricsError::Json {
                path: path.clone(),
                source,
            })?;
        counters.sound += usize::from(comparison.is_sound);
        counters.complete += usize::from(comparison.is_complete);
        counters.equivalent += usize::from(comparison.is_equivalent);
    }
    Ok(counters)
}

/// Shares of the usable packages; 100% across the board when nothing was
/// usable.
pub fn relative_metrics(absolute: &AbsoluteMetrics) -> RelativeMetrics {
    let usable = absolute.usable;
    let share = |value: &usize| {
        if usable > 0 {
            percent(*value as f64 / usable as f64)
        } else {
            percent(1.0)
        }
    };
    RelativeMetrics {
        combined_extraction: absolute.combined_extraction.map(share),
        combined_generation: absolute.combined_generation.map(share),
        combined_all: absolute.combined_all.map(share),
    }
}

/// Relative change against `combined_extraction`; `inf%` where the
/// baseline count is zero.
pub fn baseline_metrics(absolute: &AbsoluteMetrics) -> BaselineMetrics {
    let change = |value: &usize, base: &usize| {
        if *base > 0 {
            percent((*value as f64 - *base as f64) / *base as f64)
        } else {
            percent(f64::INFINITY)
        }
    };
    let base = &absolute.combined_extraction;
    BaselineMetrics {
        combined_generation: absolute.combined_generation.zip_map(base, change),
        combined_all: absolute.combined_all.zip_map(base, change),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SOUND: &str = r#"{"soundness":1,"completeness":1,"equivalence":1,"isSound":true,"isComplete":true,"isEquivalent":true}"#;
    const UNSOUND: &str = r#"{"soundness":0.5,"completeness":1,"equivalence":0.5,"isSound":false,"isComplete":true,"isEquivalent":false}"#;

    fn finished_run(evaluation: &EvaluationLayout, package: &str, usable: bool) -> RunLayout {
        let layout = RunLayout::new(evaluation.package_root(package));
        let status = StatusStore::new(layout.status_path());
        status.initialize_baseline().unwrap();
        status.set_flag(StatusFlag::Usable, usable, true).unwrap();
        status.set_flag(StatusFlag::HasReadme, true, true).unwrap();
        layout
    }

    fn artifact(dir: PathBuf, name: &str, content: &str) {
        fsutil::write_file(&dir.join(name), content).unwrap();
    }

    #[test]
    fn test_collect_absolute() {
        let dir = tempdir().unwrap();
        let evaluation = EvaluationLayout::new(dir.path());
        let abs = finished_run(&evaluation, "abs", true);
        artifact(abs.examples_dir(Mode::CombinedAll), "0.js", "x");
        artifact(abs.declarations_dir(Mode::CombinedAll), "0.d.ts", "x");
        artifact(abs.comparisons_dir(Mode::CombinedAll), "0.json", SOUND);
        let pad = finished_run(&evaluation, "left-pad", true);
        artifact(pad.comparisons_dir(Mode::CombinedAll), "0.json", UNSOUND);
        artifact(pad.examples_dir(Mode::CombinedExtraction), "0.js", "x");
        finished_run(&evaluation, "broken", false);

        let packages = ["abs", "left-pad", "broken"].map(String::from);
        let metrics = collect_absolute(&evaluation, &packages).unwrap();
        assert_eq!(metrics.total, 3);
        assert_eq!(metrics.usable, 2);
        assert_eq!(metrics.has_readme, 3);
        assert_eq!(metrics.has_main, 0);
        assert_eq!(
            metrics.combined_all,
            ModeMetrics {
                sound: 1,
                complete: 2,
                equivalent: 1,
                examples_generated: 1,
                declarations_generated: 1,
                comparisons_generated: 2,
            }
        );
        assert_eq!(metrics.combined_extraction.examples_generated, 1);
        assert_eq!(metrics.mode(Mode::Extraction), None);
    }

    #[test]
    fn test_more_than_one_comparison_is_an_error() {
        let dir = tempdir().unwrap();
        let evaluation = EvaluationLayout::new(dir.path());
        let abs = finished_run(&evaluation, "abs", true);
        artifact(abs.comparisons_dir(Mode::CombinedGeneration), "0.json", SOUND);
        artifact(abs.comparisons_dir(Mode::CombinedGeneration), "1.json", SOUND);

        let err = collect_absolute(&evaluation, &["abs".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::TooManyComparisons { count: 2, mode: Mode::CombinedGeneration, .. }
        ));
    }

    #[test]
    fn test_missing_status_is_an_error() {
        let dir = tempdir().unwrap();
        let evaluation = EvaluationLayout::new(dir.path());
        let err = collect_absolute(&evaluation, &["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, MetricsError::Status { .. }));
    }

    #[test]
    fn test_relative_and_baseline() {
        let absolute = AbsoluteMetrics {
            usable: 4,
            combined_extraction: ModeMetrics {
                sound: 2,
                examples_generated: 4,
                ..ModeMetrics::default()
            },
            combined_generation: ModeMetrics {
                sound: 3,
                examples_generated: 2,
                ..ModeMetrics::default()
            },
            ..AbsoluteMetrics::default()
        };
        let relative = relative_metrics(&absolute);
        assert_eq!(relative.combined_extraction.sound, "50.00%");
        assert_eq!(relative.combined_generation.examples_generated, "50.00%");
        assert_eq!(relative.combined_all.sound, "0.00%");

        let baseline = baseline_metrics(&absolute);
        assert_eq!(baseline.combined_generation.sound, "50.00%");
        assert_eq!(baseline.combined_generation.examples_generated, "-50.00%");
        assert_eq!(baseline.combined_all.complete, "inf%");
    }

    #[test]
    fn test_nothing_usable_is_full_share() {
        let relative = relative_metrics(&AbsoluteMetrics::default());
        assert_eq!(relative.combined_all.comparisons_generated, "100.00%");
    }

    #[test]
    fn test_report_files() {
        let dir = tempdir().unwrap();
        MetricsReport::new(AbsoluteMetrics::default())
            .write(dir.path())
            .unwrap();
        for name in [
            "absolute_metrics.json",
            "relative_metrics.json",
            "baseline_metrics.json",
        ] {
            assert!(dir.path().join(name).is_file(), "{name}");
        }
        let absolute: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("absolute_metrics.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(absolute["combined_all"]["sound"], 0);
        assert_eq!(absolute["unexpected_failure"], 0);
    }
}
