//! dtsgen - example-driven TypeScript declaration generation
//!
//! ## Commands
//!
//! - `generate`: run the pipeline for one npm package
//! - `evaluate`: sweep a sample of DefinitelyTyped packages and compute metrics

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

use dtsgen_core::{escape_package_name, CancelToken, LocalShell, Narrator};
use dtsgen_pipeline::{
    AutoContinue, EvaluationConfig, EvaluationDriver, OperatorInput, PipelineConfig,
    PipelineController, StdinOperator,
};

#[derive(Parser)]
#[command(name = "dtsgen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate TypeScript declarations for npm packages from usage examples", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file; command-line flags take precedence
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both commands.
#[derive(Args, Debug, Clone, Default)]
struct ToolOptions {
    /// Shared build directory for DefinitelyTyped and the analysis tools
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Directory holding the declaration/ and comparison/ scripts
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Skip example generation with the prompting agent
    #[arg(long)]
    exclude_llm: bool,

    /// Command invoked as `<command> <request.json> <reply.json>`
    #[arg(long, env = "DTSGEN_AGENT_COMMAND")]
    agent_command: Option<String>,

    /// Model name passed to the agent
    #[arg(long)]
    model: Option<String>,
}

impl ToolOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.build_dir {
            config.build_dir = dir.clone();
        }
        if let Some(dir) = &self.assets_dir {
            config.assets_dir = dir.clone();
        }
        if self.exclude_llm {
            config.generate_with_agent = false;
        }
        if let Some(command) = &self.agent_command {
            config.agent.command = command.clone();
        }
        if let Some(model) = &self.model {
            config.agent.model = model.clone();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate examples and declarations for one package
    Generate {
        /// npm package name
        #[arg(short, long)]
        package: String,

        /// Output directory; the run root is `<output>/<escaped package>`
        #[arg(short, long, default_value = "output/generation")]
        output: PathBuf,

        /// Also compare declarations against DefinitelyTyped
        #[arg(long)]
        compare: bool,

        /// Skip the ES5 support check
        #[arg(long)]
        exclude_es5_check: bool,

        /// Run declarations and comparisons on every mode, not only combined ones
        #[arg(long)]
        all_modes: bool,

        /// Keep a finished result instead of regenerating it
        #[arg(long)]
        keep_existing: bool,

        #[command(flatten)]
        tools: ToolOptions,
    },

    /// Evaluate a sample of DefinitelyTyped packages
    Evaluate {
        /// First index of the sampled slice
        #[arg(long, default_value = "0")]
        start: usize,

        /// Number of packages (default: 100)
        #[arg(long)]
        length: Option<usize>,

        /// Take every package from `start` on
        #[arg(long, conflicts_with = "length")]
        all: bool,

        /// Shuffle seed (default: 42)
        #[arg(long)]
        seed: Option<u64>,

        /// Keep packages sorted by name
        #[arg(long, conflicts_with = "seed")]
        sorted: bool,

        /// Output directory of the sweep
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Require packages to bundle as ES5
        #[arg(long)]
        check_es5: bool,

        /// Continue after unexpected failures without waiting for input
        #[arg(long)]
        non_interactive: bool,

        #[command(flatten)]
        tools: ToolOptions,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dtsgen_core::init_tracing(cli.json, level);

    let narrator = Narrator::console();
    let cancel = CancelToken::new();
    let shell = Arc::new(LocalShell::new(narrator.clone()).with_cancel_token(cancel.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, terminating running commands");
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Generate {
            package,
            output,
            compare,
            exclude_es5_check,
            all_modes,
            keep_existing,
            tools,
        } => {
            let mut config = match &cli.config {
                Some(path) => PipelineConfig::from_json_file(path)?,
                None => PipelineConfig {
                    check_es5: true,
                    ..PipelineConfig::default()
                },
            };
            tools.apply(&mut config);
            config.generate_comparisons |= compare;
            config.check_es5 &= !exclude_es5_check;
            config.combined_only &= !all_modes;
            config.overwrite &= !keep_existing;
            cmd_generate(shell, narrator, config, &package, &output).await
        }
        Commands::Evaluate {
            start,
            length,
            all,
            seed,
            sorted,
            output,
            check_es5,
            non_interactive,
            tools,
        } => {
            let mut config = match &cli.config {
                Some(path) => EvaluationConfig::from_json_file(path)?,
                None => EvaluationConfig::default(),
            };
            tools.apply(&mut config.pipeline);
            config.start = start;
            if length.is_some() || all {
                config.length = length;
            }
            if seed.is_some() || sorted {
                config.seed = seed;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            config.pipeline.check_es5 |= check_es5;
            config.interactive &= !non_interactive;
            cmd_evaluate(shell, narrator, config).await
        }
    }
}

async fn cmd_generate(
    shell: Arc<LocalShell>,
    narrator: Narrator,
    config: PipelineConfig,
    package: &str,
    output: &Path,
) -> Result<()> {
    let root = output.join(escape_package_name(package));
    let controller = PipelineController::new(shell, narrator, config);
    let report = controller
        .run(package, &root)
        .await
        .with_context(|| format!("Generation for {package} failed"))?;

    if report.skipped {
        info!(package = %package, root = %root.display(), "result already generated");
        return Ok(());
    }
    for stage in &report.stages {
        info!(
            stage = %stage.kind,
            produced = stage.produced_count(),
            failed = stage.failed_count(),
            "stage summary"
        );
    }
    println!("Generated {} into {}", package, root.display());
    Ok(())
}

async fn cmd_evaluate(
    shell: Arc<LocalShell>,
    narrator: Narrator,
    config: EvaluationConfig,
) -> Result<()> {
    let output = config.output_dir.clone();
    let operator: Arc<dyn OperatorInput> = if config.interactive {
        Arc::new(StdinOperator)
    } else {
        Arc::new(AutoContinue)
    };
    let report = EvaluationDriver::new(shell, narrator, config)
        .with_operator(operator)
        .run()
        .await
        .context("Evaluation failed")?;

    if report.aborted {
        println!("Evaluation aborted after {} failure(s)", report.failures.len());
        return Ok(());
    }
    println!(
        "Evaluated {} of {} packages ({} failed); metrics in {}",
        report.sampled.len(),
        report.available,
        report.failures.len(),
        output.join("metrics").display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_flags() {
        let cli = Cli::try_parse_from([
            "dtsgen",
            "generate",
            "--package",
            "abs",
            "--compare",
            "--exclude-llm",
            "--build-dir",
            "/tmp/builds",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                package,
                compare,
                tools,
                ..
            } => {
                assert_eq!(package, "abs");
                assert!(compare);
                let mut config = PipelineConfig::default();
                tools.apply(&mut config);
                assert!(!config.generate_with_agent);
                assert_eq!(config.build_dir, PathBuf::from("/tmp/builds"));
            }
            Commands::Evaluate { .. } => panic!("expected generate"),
        }
    }

    #[test]
    fn test_evaluate_rejects_conflicts() {
        assert!(Cli::try_parse_from(["dtsgen", "evaluate", "--seed", "1", "--sorted"]).is_err());
        assert!(Cli::try_parse_from(["dtsgen", "evaluate", "--length", "5", "--all"]).is_err());
    }
}
