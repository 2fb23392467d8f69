//! Run-level error taxonomy.

use serde::{Deserialize, Serialize};

use crate::shell::ShellError;
use crate::status::{StatusError, StatusFlag};

/// Errors that end a run.
///
/// Every variant except [`PipelineError::Cancelled`] maps to exactly one
/// status flag, see [`PipelineError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("package data missing: {0}")]
    PackageDataMissing(String),

    #[error("package installation failed: {0}")]
    PackageInstallationFailed(String),

    #[error("CommonJS unsupported: {0}")]
    CommonJsUnsupported(String),

    #[error("ES5 unsupported: {0}")]
    Es5Unsupported(String),

    #[error("rejected by the prompting agent: {0}")]
    LlmRejected(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("unexpected failure: {0:#}")]
    Unexpected(anyhow::Error),
}

/// Kind of a recorded run failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PackageDataMissing,
    PackageInstallationFailed,
    CommonJsUnsupported,
    Es5Unsupported,
    LlmRejected,
    Unexpected,
}

impl FailureKind {
    /// The status flag a failure of this kind sets.
    pub fn status_flag(self) -> StatusFlag {
        match self {
            FailureKind::PackageDataMissing => StatusFlag::PackageDataMissing,
            FailureKind::PackageInstallationFailed => StatusFlag::PackageInstallationFailed,
            FailureKind::CommonJsUnsupported => StatusFlag::CommonjsUnsupported,
            FailureKind::Es5Unsupported => StatusFlag::Es5Unsupported,
            FailureKind::LlmRejected => StatusFlag::LlmRejected,
            FailureKind::Unexpected => StatusFlag::UnexpectedFailure,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FailureKind::PackageDataMissing => "PackageDataMissing",
            FailureKind::PackageInstallationFailed => "PackageInstallationFailed",
            FailureKind::CommonJsUnsupported => "CommonJsUnsupported",
            FailureKind::Es5Unsupported => "Es5Unsupported",
            FailureKind::LlmRejected => "LlmRejected",
            FailureKind::Unexpected => "Unexpected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl PipelineError {
    pub fn unexpected(message: impl std::fmt::Display) -> Self {
        PipelineError::Unexpected(anyhow::anyhow!("{message}"))
    }

    /// Taxonomy kind; `None` for cancellation.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            PipelineError::PackageDataMissing(_) => Some(FailureKind::PackageDataMissing),
            PipelineError::PackageInstallationFailed(_) => {
                Some(FailureKind::PackageInstallationFailed)
            }
            PipelineError::CommonJsUnsupported(_) => Some(FailureKind::CommonJsUnsupported),
            PipelineError::Es5Unsupported(_) => Some(FailureKind::Es5Unsupported),
            PipelineError::LlmRejected(_) => Some(FailureKind::LlmRejected),
            PipelineError::Unexpected(_) => Some(FailureKind::Unexpected),
            PipelineError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<ShellError> for PipelineError {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Cancelled { .. } => PipelineError::Cancelled,
            other => PipelineError::Unexpected(other.into()),
        }
    }
}

impl From<StatusError> for PipelineError {
    fn from(err: StatusError) -> Self {
        PipelineError::Unexpected(err.into())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Unexpected(err.into())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        // Keep cancellation recognizable when it travelled through anyhow.
        match err.downcast::<ShellError>() {
            Ok(shell) => shell.into(),
            Err(err) => PipelineError::Unexpected(err),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
