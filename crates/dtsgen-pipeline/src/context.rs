//! Everything a stage needs to act on one run.

use std::path::Path;

use dtsgen_core::fsutil;
use dtsgen_core::{
    AssetsLayout, BuildLayout, Narrator, ProcessInvocation, Result, RunLayout, Shell, StatusStore,
};

use crate::config::PipelineConfig;

/// Borrowed view of a run shared by its stages.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub package: &'a str,
    pub shell: &'a dyn Shell,
    pub narrator: &'a Narrator,
    pub layout: &'a RunLayout,
    pub build: &'a BuildLayout,
    pub assets: &'a AssetsLayout,
    pub status: &'a StatusStore,
    pub config: &'a PipelineConfig,
}

/// The part of a run that shared build steps need. Also usable without a
/// run, e.g. by the evaluation sweep.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub shell: &'a dyn Shell,
    pub narrator: &'a Narrator,
    pub build: &'a BuildLayout,
    pub config: &'a PipelineConfig,
}

impl ToolContext<'_> {
    /// Invocation for installs, clones and builds.
    pub fn setup_command(&self, command: impl Into<String>) -> ProcessInvocation {
        ProcessInvocation::new(command)
            .timeout(self.config.installation_timeout())
            .verbose(self.config.verbose_setup)
    }
}

impl<'a> RunContext<'a> {
    pub fn tools(&self) -> ToolContext<'a> {
        ToolContext {
            shell: self.shell,
            narrator: self.narrator,
            build: self.build,
            config: self.config,
        }
    }

    /// Invocation for installs, clones and builds.
    pub fn setup_command(&self, command: impl Into<String>) -> ProcessInvocation {
        self.tools().setup_command(command)
    }

    /// Invocation for running examples and analysis scripts.
    pub fn execution_command(&self, command: impl Into<String>, cwd: &Path) -> ProcessInvocation {
        ProcessInvocation::new(command)
            .cwd(cwd)
            .timeout(self.config.execution_timeout())
            .verbose(self.config.verbose_execution)
    }

    /// Replace the playground with a fresh copy of the template project.
    pub fn fresh_playground(&self) -> Result<std::path::PathBuf> {
        let playground = self.layout.playground_dir();
        fsutil::create_dir(&playground, true)?;
        fsutil::copy_dir(&self.layout.template_dir(), &playground)?;
        Ok(playground)
    }

    /// Narrate file content when file narration is enabled.
    pub fn show_file(&self, label: &str, content: &str) {
        if self.config.verbose_files {
            self.narrator.write_block(label, content);
        }
    }
}
