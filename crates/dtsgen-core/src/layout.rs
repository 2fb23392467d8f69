//! On-disk layout of runs, shared builds, assets and evaluations.
//!
//! Paths are computed, never cached: every accessor joins onto the root it
//! was constructed with.

use std::path::{Path, PathBuf};

use crate::domain::{escape_package_name, Mode};

/// Layout of one run's output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// The status document.
    pub fn status_path(&self) -> PathBuf {
        self.data_dir().join("data.json")
    }

    pub fn package_json(&self) -> PathBuf {
        self.data_dir().join("package.json")
    }

    /// Manifests of the template project, kept for reproduction.
    pub fn template_manifests_dir(&self) -> PathBuf {
        self.data_dir().join("template")
    }

    pub fn readme(&self) -> PathBuf {
        self.data_dir().join("README.md")
    }

    pub fn main_file(&self) -> PathBuf {
        self.data_dir().join("index.js")
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.data_dir().join("tests")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Transcript of the whole run.
    pub fn shell_log(&self) -> PathBuf {
        self.logs_dir().join("shell.txt")
    }

    pub fn examples_dir(&self, mode: Mode) -> PathBuf {
        self.root.join("examples").join(mode.dir_name())
    }

    pub fn declarations_dir(&self, mode: Mode) -> PathBuf {
        self.root.join("declarations").join(mode.dir_name())
    }

    pub fn comparisons_dir(&self, mode: Mode) -> PathBuf {
        self.root.join("comparisons").join(mode.dir_name())
    }

    /// Stage roots created up front by the controller.
    pub fn stage_dirs(&self) -> [PathBuf; 5] {
        [
            self.data_dir(),
            self.logs_dir(),
            self.root.join("examples"),
            self.root.join("declarations"),
            self.root.join("comparisons"),
        ]
    }

    /// Every directory a run writes under its root.
    pub fn owned_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.stage_dirs().to_vec();
        dirs.push(self.cache_dir());
        dirs
    }

    /// Scratch area, safe to delete after the run.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn repository_dir(&self) -> PathBuf {
        self.cache_dir().join("repository")
    }

    /// npm project with the package installed; copied for every execution.
    pub fn template_dir(&self) -> PathBuf {
        self.cache_dir().join("template")
    }

    /// Working copy of the template, recreated per execution.
    pub fn playground_dir(&self) -> PathBuf {
        self.cache_dir().join("playground")
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.cache_dir().join("agent")
    }
}

/// Layout of the build directory shared by all runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    root: PathBuf,
}

impl BuildLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn definitely_typed(&self) -> PathBuf {
        self.root.join("DefinitelyTyped")
    }

    pub fn definitely_typed_types(&self) -> PathBuf {
        self.definitely_typed().join("types")
    }

    /// Reference declaration of `package` in DefinitelyTyped.
    pub fn reference_declaration(&self, package: &str) -> PathBuf {
        self.definitely_typed_types()
            .join(escape_package_name(package))
            .join("index.d.ts")
    }

    pub fn run_time_analyzer(&self) -> PathBuf {
        self.root.join(RUN_TIME_ANALYZER)
    }

    pub fn declaration_generator(&self) -> PathBuf {
        self.root.join(DECLARATION_GENERATOR)
    }

    pub fn npm_tools(&self) -> PathBuf {
        self.root.join("npm-tools")
    }

    pub fn transpile_script(&self) -> PathBuf {
        self.npm_tools().join("transpile.js")
    }
}

/// Name of the run-time analyzer checkout and of its output directory.
pub const RUN_TIME_ANALYZER: &str = "run-time-information-analyzer";

/// Name of the declaration generator checkout and of its output directory.
pub const DECLARATION_GENERATOR: &str = "ts-declaration-file-generator";

/// Layout of the static scripts shipped alongside the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetsLayout {
    root: PathBuf,
}

impl AssetsLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn declaration_scripts(&self) -> PathBuf {
        self.root.join("declaration")
    }

    pub fn comparison_scripts(&self) -> PathBuf {
        self.root.join("comparison")
    }

    /// Analyzer wrapper; Linux needs a variant with host networking.
    pub fn run_time_script(&self) -> PathBuf {
        let name = if cfg!(target_os = "linux") {
            "getRunTimeInformation.linux.sh"
        } else {
            "getRunTimeInformation.sh"
        };
        self.declaration_scripts().join(name)
    }

    pub fn generate_declaration_script(&self) -> PathBuf {
        self.declaration_scripts().join("generateDeclarationFile.sh")
    }
}

/// Layout of an evaluation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationLayout {
    root: PathBuf,
}

impl EvaluationLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Run root of `package` inside the sweep.
    pub fn package_root(&self, package: &str) -> PathBuf {
        self.packages_dir().join(escape_package_name(package))
    }

    pub fn reproduction_info(&self) -> PathBuf {
        self.root.join("reproduction").join("info.json")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.root.join("metrics")
    }
}
