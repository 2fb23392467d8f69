//! Pipeline and evaluation configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default limit for installs, clones and builds.
pub const INSTALLATION_TIMEOUT_SECS: u64 = 600;

/// Default limit for running one example or analysis script.
pub const EXECUTION_TIMEOUT_SECS: u64 = 60;

/// Configuration of a single package run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shared checkout/build directory (DefinitelyTyped, analyzers, npm tools).
    pub build_dir: PathBuf,

    /// Static scripts (`declaration/`, `comparison/`).
    pub assets_dir: PathBuf,

    pub installation_timeout_secs: u64,
    pub execution_timeout_secs: u64,

    /// Proposals requested from the agent before giving up.
    pub max_attempts: usize,

    /// Longest excerpt of any file or command output handed to the agent.
    pub max_prompt_chars: usize,

    pub max_test_files: usize,

    // Stages
    pub generate_examples: bool,
    pub generate_declarations: bool,
    pub generate_comparisons: bool,

    // Example sources
    pub extract_from_readme: bool,
    pub generate_with_agent: bool,
    pub combine_examples: bool,

    /// Run declarations and comparisons on combined modes only.
    pub combined_only: bool,

    pub check_es5: bool,

    /// Wipe the run root before starting, even if it holds a finished run.
    pub overwrite: bool,

    /// Delete `cache/` when the run ends.
    pub remove_cache: bool,

    // Narration
    pub verbose: bool,
    pub verbose_setup: bool,
    pub verbose_execution: bool,
    pub verbose_files: bool,

    pub agent: AgentConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("output/builds"),
            assets_dir: PathBuf::from("assets"),
            installation_timeout_secs: INSTALLATION_TIMEOUT_SECS,
            execution_timeout_secs: EXECUTION_TIMEOUT_SECS,
            max_attempts: 3,
            max_prompt_chars: 10_000,
            max_test_files: 3,
            generate_examples: true,
            generate_declarations: true,
            generate_comparisons: false,
            extract_from_readme: true,
            generate_with_agent: true,
            combine_examples: true,
            combined_only: true,
            check_es5: false,
            overwrite: true,
            remove_cache: false,
            verbose: true,
            verbose_setup: true,
            verbose_execution: false,
            verbose_files: false,
            agent: AgentConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn installation_timeout(&self) -> Duration {
        Duration::from_secs(self.installation_timeout_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

/// The external prompting agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Invoked as `<command> <request.json> <reply.json>`.
    pub command: String,

    pub model: String,

    /// Narrate every exchanged message.
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "dtsgen-agent".to_string(),
            model: "gpt-4o-mini-2024-07-18".to_string(),
            verbose: true,
        }
    }
}

/// Configuration of an evaluation sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub output_dir: PathBuf,

    /// First index of the sampled slice.
    pub start: usize,

    /// Slice length; `None` takes every remaining package.
    pub length: Option<usize>,

    /// Shuffle seed; `None` keeps packages sorted by name.
    pub seed: Option<u64>,

    /// Pause for the operator after an unexpected failure.
    pub interactive: bool,

    pub verbose_statistics: bool,

    pub pipeline: PipelineConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output/evaluation"),
            start: 0,
            length: Some(100),
            seed: Some(42),
            interactive: true,
            verbose_statistics: true,
            pipeline: PipelineConfig {
                generate_comparisons: true,
                overwrite: false,
                remove_cache: true,
                ..PipelineConfig::default()
            },
        }
    }
}

impl EvaluationConfig {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.installation_timeout(), Duration::from_secs(600));
        assert_eq!(config.execution_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_attempts, 3);
        assert!(config.combined_only);
        assert!(!config.generate_comparisons);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"execution_timeout_secs": 5, "agent": {"model": "local"}}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.execution_timeout(), Duration::from_secs(5));
        assert_eq!(config.agent.model, "local");
        assert_eq!(config.agent.command, "dtsgen-agent");
        assert_eq!(config.max_test_files, 3);
    }

    #[test]
    fn test_evaluation_defaults_compare_and_resume() {
        let config = EvaluationConfig::default();
        assert!(config.pipeline.generate_comparisons);
        assert!(!config.pipeline.overwrite);
        assert!(config.pipeline.remove_cache);
        assert_eq!(config.length, Some(100));
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        let err = PipelineConfig::from_json_file(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }
}
