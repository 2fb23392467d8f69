//! The declarations stage: example → run-time trace → `.d.ts`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use dtsgen_core::fsutil;
use dtsgen_core::layout::{DECLARATION_GENERATOR, RUN_TIME_ANALYZER};
use dtsgen_core::{is_scoped, Mode, PipelineError, Result};

use crate::context::RunContext;
use crate::stage::{ArtifactProducer, StageKind, StageReport, StageRunner};
use crate::workspace;

/// Derives one declaration per example by running it under the run-time
/// analyzer and feeding the trace to the declaration generator.
pub struct DeclarationProducer<'a> {
    run: RunContext<'a>,
    transpile_script: PathBuf,
    run_time_script: PathBuf,
    generate_script: PathBuf,
}

impl<'a> DeclarationProducer<'a> {
    pub fn new(run: RunContext<'a>) -> Result<Self> {
        Ok(Self {
            transpile_script: fsutil::absolute(&run.build.transpile_script())?,
            run_time_script: fsutil::absolute(&run.assets.run_time_script())?,
            generate_script: fsutil::absolute(&run.assets.generate_declaration_script())?,
            run,
        })
    }

    /// Run one step in the playground; `false` when it did not exit cleanly.
    async fn step(&self, label: &str, command: String, playground: &Path) -> Result<bool> {
        let narrator = self.run.narrator;
        let _scope = narrator.enter(label);
        let invocation = self.run.execution_command(command, playground);
        let result = self.run.shell.run(&invocation, false).await?;
        Ok(result.success())
    }
}

#[async_trait]
impl ArtifactProducer for DeclarationProducer<'_> {
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
        let _scope = narrator.enter(format!("Generating declarations for {name}:"));
        if run.config.verbose_files {
            run.show_file("Example content:", &std::fs::read_to_string(input)?);
        }

        let playground = run.fresh_playground()?;
        std::fs::copy(input, playground.join("index.js"))?;

        // Downlevel to ES5; missing APIs such as promises are not polyfilled.
        let transpile = format!("node {} index.js", self.transpile_script.display());
        if !self
            .step("Transpiling example into ES5:", transpile, &playground)
            .await?
        {
            narrator.write("Fail");
            return Ok(None);
        }
        narrator.write("Success");
        if run.config.verbose_files {
            let transpiled = std::fs::read_to_string(playground.join("index.js"))?;
            run.show_file("Transpiled example content:", &transpiled);
        }

        let trace = format!("{RUN_TIME_ANALYZER}/run_time_info.json");
        fsutil::create_dir(&playground.join(RUN_TIME_ANALYZER), true)?;
        let analyze = format!(
            "{} index.js {trace} {}",
            self.run_time_script.display(),
            run.config.execution_timeout_secs * 2
        );
        if !self
            .step(&format!("Running {RUN_TIME_ANALYZER}:"), analyze, &playground)
            .await?
            || !fsutil::file_nonempty(&playground.join(&trace))
        {
            narrator.write("Fail");
            return Ok(None);
        }
        narrator.write("Success");

        fsutil::create_dir(&playground.join(DECLARATION_GENERATOR), true)?;
        let generate = format!(
            "{} {trace} {} {DECLARATION_GENERATOR}",
            self.generate_script.display(),
            run.package
        );
        let generated = playground
            .join(DECLARATION_GENERATOR)
            .join(run.package)
            .join("index.d.ts");
        if !self
            .step(&format!("Running {DECLARATION_GENERATOR}:"), generate, &playground)
            .await?
            || !fsutil::file_nonempty(&generated)
        {
            narrator.write("Fail");
            return Ok(None);
        }
        let declaration = std::fs::read_to_string(&generated)?.trim().to_string();
        run.show_file("Declaration content:", &declaration);
        let output = output_dir.join(name.replace(".js", ".d.ts"));
        fsutil::write_file(&output, &declaration)?;
        narrator.write("Success");
        Ok(Some(output))
    }
}

/// Build the analysis tools, then derive declarations for every example.
pub async fn generate_declarations(run: RunContext<'_>) -> Result<StageReport> {
    let _scope = run.narrator.enter("Generating declarations:");
    if is_scoped(run.package) {
        return Err(PipelineError::unexpected(format!(
            "{DECLARATION_GENERATOR} does not support scoped package names ({})",
            run.package
        )));
    }
    workspace::build_run_time_analyzer(run).await?;
    workspace::build_declaration_generator(run).await?;
    workspace::build_npm_tools(run).await?;
    workspace::build_template_project(run).await?;

    let producer = DeclarationProducer::new(run)?;
    StageRunner::new(run.layout, run.narrator)
        .run_stage(
            StageKind::Declarations,
            Mode::selection(run.config.combined_only),
            &producer,
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use dtsgen_core::fakes::ScriptedShell;
    use dtsgen_core::{
        AssetsLayout, BuildLayout, Narrator, ProcessResult, RunLayout, StatusStore,
    };
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        shell: ScriptedShell,
        narrator: Narrator,
        layout: RunLayout,
        build: BuildLayout,
        assets: AssetsLayout,
        status: StatusStore,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let layout = RunLayout::new(dir.path().join("run"));
            fsutil::write_file(&layout.template_dir().join("package.json"), "{}").unwrap();
            Self {
                shell: ScriptedShell::new(),
                narrator: Narrator::silent(),
                build: BuildLayout::new(dir.path().join("builds")),
                assets: AssetsLayout::new(dir.path().join("assets")),
                status: StatusStore::new(layout.status_path()),
                layout,
                config: PipelineConfig::default(),
                _dir: dir,
            }
        }

        fn run<'a>(&'a self, package: &'a str) -> RunContext<'a> {
            RunContext {
                package,
                shell: &self.shell,
                narrator: &self.narrator,
                layout: &self.layout,
                build: &self.build,
                assets: &self.assets,
                status: &self.status,
                config: &self.config,
            }
        }
    }

    /// Stand-ins for the analyzer and generator scripts.
    fn analysis_tools(shell: &ScriptedShell, declaration: &'static str) {
        shell.on("getRunTimeInformation", |invocation| {
            let cwd = invocation.cwd.clone().unwrap();
            fsutil::write_file(&cwd.join(RUN_TIME_ANALYZER).join("run_time_info.json"), "{}")
                .unwrap();
            Ok(ProcessResult::ok(""))
        });
        shell.on("generateDeclarationFile.sh", move |invocation| {
            let cwd = invocation.cwd.clone().unwrap();
            let target = cwd.join(DECLARATION_GENERATOR).join("abs").join("index.d.ts");
            fsutil::write_file(&target, declaration).unwrap();
            Ok(ProcessResult::ok(""))
        });
    }

    #[tokio::test]
    async fn test_declaration_pipeline() {
        let fixture = Fixture::new();
        analysis_tools(&fixture.shell, "\nexport declare function abs(n: number): number;\n");
        let input = fixture.layout.examples_dir(Mode::Extraction).join("0.js");
        fsutil::write_file(&input, "require('abs')(-1);").unwrap();
        let output_dir = fixture.layout.declarations_dir(Mode::Extraction);
        fsutil::create_dir(&output_dir, false).unwrap();

        let producer = DeclarationProducer::new(fixture.run("abs")).unwrap();
        let output = producer
            .produce(Mode::Extraction, &input, &output_dir)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output, output_dir.join("0.d.ts"));
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "export declare function abs(n: number): number;"
        );

        let commands = fixture.shell.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].starts_with("node ") && commands[0].ends_with("transpile.js index.js"));
        assert!(commands[1].ends_with(
            "index.js run-time-information-analyzer/run_time_info.json 120"
        ));
        assert!(commands[2].ends_with(
            "run-time-information-analyzer/run_time_info.json abs ts-declaration-file-generator"
        ));
    }

    #[tokio::test]
    async fn test_missing_trace_rejects_artifact() {
        let fixture = Fixture::new();
        let input = fixture.layout.examples_dir(Mode::Generation).join("0.js");
        fsutil::write_file(&input, "require('abs');").unwrap();
        let output_dir = fixture.layout.declarations_dir(Mode::Generation);

        let producer = DeclarationProducer::new(fixture.run("abs")).unwrap();
        let output = producer
            .produce(Mode::Generation, &input, &output_dir)
            .await
            .unwrap();
        assert_eq!(output, None);
        // The generator never runs without a trace.
        assert_eq!(fixture.shell.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_transpile_rejects_artifact() {
        let fixture = Fixture::new();
        fixture
            .shell
            .on_result("transpile.js", ProcessResult::failed(1, "SyntaxError"));
        let input = fixture.layout.examples_dir(Mode::Generation).join("0.js");
        fsutil::write_file(&input, "require('abs');").unwrap();

        let producer = DeclarationProducer::new(fixture.run("abs")).unwrap();
        let output = producer
            .produce(
                Mode::Generation,
                &input,
                &fixture.layout.declarations_dir(Mode::Generation),
            )
            .await
            .unwrap();
        assert_eq!(output, None);
        assert_eq!(fixture.shell.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_scoped_packages_are_unsupported() {
        let fixture = Fixture::new();
        let err = generate_declarations(fixture.run("@babel/core"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(dtsgen_core::FailureKind::Unexpected));
        assert_eq!(fixture.shell.invocation_count(), 0);
    }
}
