//! Integration tests for EvaluationDriver sampling, failure handling and metrics.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use dtsgen_core::fakes::ScriptedShell;
use dtsgen_core::fsutil;
use dtsgen_core::{EvaluationLayout, FailureKind, Mode, Narrator, ProcessResult, RunLayout};
use dtsgen_pipeline::evaluation::{available_packages, shuffle, PackageFailure};
use dtsgen_pipeline::{
    AutoContinue, EvaluationConfig, EvaluationDriver, ModeMetrics, OperatorInput, PipelineConfig,
};

const README: &str = "```js\nconsole.log(require('abs')(-1));\n```\n";
const SCORES: &str = r#"{"soundness":1,"completeness":1,"equivalence":1,"isSound":true,"isComplete":true,"isEquivalent":true}"#;

struct Harness {
    dir: tempfile::TempDir,
    shell: Arc<ScriptedShell>,
}

impl Harness {
    /// DefinitelyTyped knows `abs`, `left-pad` and `@babel/core`; only
    /// `abs` has a GitHub repository.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let types = dir.path().join("builds/DefinitelyTyped/types");
        for package in ["abs", "left-pad", "babel__core"] {
            fsutil::write_file(&types.join(package).join("index.d.ts"), "export = x;").unwrap();
        }
        for script in ["compare.ts", "tsconfig.json"] {
            fsutil::write_file(&dir.path().join("assets/comparison").join(script), "").unwrap();
        }

        let shell = Arc::new(ScriptedShell::new());
        shell.on_result(
            "npm view",
            ProcessResult::ok(r#"{"url":"git+https://github.com/x/abs.git"}"#),
        );
        shell.on_result("npm view left-pad", ProcessResult::ok(""));
        shell.on("git clone", |invocation| {
            let target = invocation.command.split_whitespace().last().unwrap();
            fsutil::write_file(&Path::new(target).join("README.md"), README).unwrap();
            Ok(ProcessResult::ok(""))
        });
        shell.on_result("node --version", ProcessResult::ok("v20.11.0\n"));
        shell.on_result("git rev-parse HEAD", ProcessResult::ok("0123abcd\n"));
        shell.on("getRunTimeInformation", |invocation| {
            let cwd = invocation.cwd.clone().unwrap();
            fsutil::write_file(
                &cwd.join("run-time-information-analyzer/run_time_info.json"),
                "{}",
            )
            .unwrap();
            Ok(ProcessResult::ok(""))
        });
        shell.on("generateDeclarationFile.sh", |invocation| {
            let cwd = invocation.cwd.clone().unwrap();
            let package = invocation.command.split_whitespace().nth(2).unwrap();
            fsutil::write_file(
                &cwd.join("ts-declaration-file-generator")
                    .join(package)
                    .join("index.d.ts"),
                "export declare function abs(n: number): number;",
            )
            .unwrap();
            Ok(ProcessResult::ok(""))
        });
        shell.on("npx tsx compare.ts", |invocation| {
            let cwd = invocation.cwd.clone().unwrap();
            fsutil::write_file(&cwd.join("comparison.json"), SCORES).unwrap();
            Ok(ProcessResult::ok(""))
        });
        Self { dir, shell }
    }

    fn with_npm_tools(self) -> Self {
        for asset in ["package.json", "package-lock.json", "transpile.js"] {
            fsutil::write_file(&self.dir.path().join("assets/declaration").join(asset), "{}")
                .unwrap();
        }
        self
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("evaluation")
    }

    fn config(&self) -> EvaluationConfig {
        EvaluationConfig {
            output_dir: self.output(),
            start: 0,
            length: None,
            seed: None,
            interactive: false,
            verbose_statistics: true,
            pipeline: PipelineConfig {
                build_dir: self.dir.path().join("builds"),
                assets_dir: self.dir.path().join("assets"),
                generate_with_agent: false,
                generate_comparisons: true,
                overwrite: false,
                remove_cache: true,
                ..PipelineConfig::default()
            },
        }
    }

    fn driver(&self, config: EvaluationConfig) -> EvaluationDriver {
        EvaluationDriver::new(self.shell.clone(), Narrator::silent(), config)
            .with_operator(Arc::new(AutoContinue))
    }
}

/// Stops the sweep on the first prompt.
#[derive(Default)]
struct AbortingOperator {
    prompts: AtomicUsize,
}

#[async_trait]
impl OperatorInput for AbortingOperator {
    async fn acknowledge(&self) -> bool {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Test: sweep over every unscoped package with aggregated metrics
#[tokio::test]
async fn test_sweep_and_metrics() {
    let harness = Harness::new().with_npm_tools();
    let report = harness
        .driver(harness.config())
        .run()
        .await
        .expect("evaluation failed");

    assert_eq!(report.available, 2, "scoped packages are not sampled");
    assert_eq!(report.sampled, vec!["abs".to_string(), "left-pad".to_string()]);
    assert_eq!(
        report.failures,
        vec![PackageFailure {
            package: "left-pad".to_string(),
            kind: FailureKind::PackageDataMissing,
        }]
    );
    assert!(!report.aborted);

    let metrics = report.metrics.expect("metrics computed");
    let absolute = &metrics.absolute;
    assert_eq!(absolute.total, 2);
    assert_eq!(absolute.usable, 1);
    assert_eq!(absolute.package_data_missing, 1);
    assert_eq!(absolute.has_readme, 1);
    let covered = ModeMetrics {
        sound: 1,
        complete: 1,
        equivalent: 1,
        examples_generated: 1,
        declarations_generated: 1,
        comparisons_generated: 1,
    };
    assert_eq!(absolute.combined_extraction, covered);
    assert_eq!(absolute.combined_all, covered);
    assert_eq!(absolute.combined_generation, ModeMetrics::default());
    assert_eq!(metrics.relative.combined_all.sound, "100.00%");
    assert_eq!(metrics.baseline.combined_all.sound, "0.00%");
    assert_eq!(metrics.baseline.combined_generation.sound, "-100.00%");

    let layout = EvaluationLayout::new(harness.output());
    for name in [
        "absolute_metrics.json",
        "relative_metrics.json",
        "baseline_metrics.json",
    ] {
        assert!(layout.metrics_dir().join(name).is_file(), "missing {name}");
    }
    let info: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(layout.reproduction_info()).unwrap())
            .unwrap();
    assert_eq!(info["node"], "v20.11.0");
    assert_eq!(info["definitely_typed"], "0123abcd");
    assert!(info["seed"].is_null());

    let transcript = std::fs::read_to_string(layout.logs_dir().join("shell.txt")).unwrap();
    assert!(transcript.starts_with("Starting evaluation:\n"));
    assert!(transcript.contains("Evaluating 2 of 2 packages (0-2)"));
    assert!(transcript.contains("Caught generation failure of kind: PackageDataMissing"));

    // Caches are removed once a package finished.
    assert!(!RunLayout::new(layout.package_root("abs")).cache_dir().exists());
    assert!(layout
        .package_root("abs")
        .join("declarations")
        .join(Mode::CombinedAll.dir_name())
        .join("0.d.ts")
        .is_file());
}

/// Test: a second sweep resumes from finished runs and keeps both transcripts
#[tokio::test]
async fn test_second_sweep_resumes() {
    let harness = Harness::new().with_npm_tools();
    harness
        .driver(harness.config())
        .run()
        .await
        .expect("evaluation failed");
    let views = harness.shell.count_matching("npm view");

    let report = harness
        .driver(harness.config())
        .run()
        .await
        .expect("second evaluation failed");
    assert_eq!(
        harness.shell.count_matching("npm view"),
        views,
        "finished packages are not regenerated"
    );
    assert_eq!(report.metrics.unwrap().absolute.usable, 1);
    let logs = EvaluationLayout::new(harness.output()).logs_dir();
    assert!(logs.join("shell.txt").is_file());
    assert!(logs.join("shell_0.txt").is_file());
}

/// Test: seeded sampling is deterministic and sliced
#[tokio::test]
async fn test_seeded_slice() {
    let harness = Harness::new().with_npm_tools();
    let report = harness
        .driver(EvaluationConfig {
            seed: Some(42),
            start: 1,
            length: Some(1),
            ..harness.config()
        })
        .run()
        .await
        .expect("evaluation failed");

    let available =
        available_packages(&harness.dir.path().join("builds/DefinitelyTyped/types")).unwrap();
    let shuffled = shuffle(available, Some(42));
    assert_eq!(report.sampled, vec![shuffled[1].clone()]);
    assert_eq!(report.metrics.unwrap().absolute.total, 1);
}

/// Test: unexpected failures pause the sweep and the operator can abort
#[tokio::test]
async fn test_operator_abort() {
    // Without npm tool assets the declarations stage fails unexpectedly.
    let harness = Harness::new();
    let operator = Arc::new(AbortingOperator::default());
    let report = harness
        .driver(EvaluationConfig {
            interactive: true,
            ..harness.config()
        })
        .with_operator(operator.clone())
        .run()
        .await
        .expect("abort is not an error");

    assert!(report.aborted);
    assert!(report.metrics.is_none());
    assert_eq!(operator.prompts.load(Ordering::SeqCst), 1);
    assert_eq!(
        report.failures,
        vec![PackageFailure {
            package: "abs".to_string(),
            kind: FailureKind::Unexpected,
        }]
    );
    assert_eq!(
        harness.shell.count_matching("npm view left-pad"),
        0,
        "packages after the abort are not evaluated"
    );
}

/// Test: non-interactive sweeps continue past unexpected failures
#[tokio::test]
async fn test_unexpected_failure_continues() {
    let harness = Harness::new();
    let report = harness
        .driver(harness.config())
        .run()
        .await
        .expect("evaluation failed");

    assert!(!report.aborted);
    assert_eq!(report.failures.len(), 2);
    let absolute = report.metrics.unwrap().absolute;
    assert_eq!(absolute.unexpected_failure, 1);
    assert_eq!(absolute.package_data_missing, 1);
    assert_eq!(absolute.usable, 0);
    assert_eq!(absolute.combined_extraction.examples_generated, 1);
}
