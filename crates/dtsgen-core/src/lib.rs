//! dtsgen core library
//!
//! Building blocks of the declaration generation pipeline: the process
//! runner, the transcript narrator, the per-run status store, the on-disk
//! layout and the run-level error taxonomy.

pub mod domain;
pub mod fakes;
pub mod fsutil;
pub mod layout;
pub mod narrator;
pub mod obs;
pub mod shell;
pub mod status;
pub mod telemetry;

pub use domain::{
    escape_package_name, is_scoped, unescape_package_name, FailureKind, Mode, PipelineError,
    Result,
};
pub use layout::{AssetsLayout, BuildLayout, EvaluationLayout, RunLayout};
pub use narrator::{Narrator, SharedBuffer};
pub use shell::{
    CancelToken, LocalShell, ProcessInvocation, ProcessResult, Shell, ShellError, ShellResult,
};
pub use status::{StatusError, StatusFlag, StatusStore, StatusValue};
pub use telemetry::init_tracing;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
