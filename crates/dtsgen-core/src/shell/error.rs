//! Error types for the shell module.

use std::time::Duration;

/// Errors produced while running an external command.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with non-zero code {code}")]
    NonZeroExit {
        command: String,
        code: i32,
        output: String,
    },

    #[error("`{command}` timed out after {}s", limit.as_secs_f64())]
    TimedOut {
        command: String,
        limit: Duration,
        output: String,
    },

    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    #[error("failed waiting for `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ShellError {
    /// Captured output of the failed command, when there is any.
    pub fn output(&self) -> Option<&str> {
        match self {
            ShellError::NonZeroExit { output, .. } | ShellError::TimedOut { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

/// Result type for shell operations.
pub type ShellResult<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_mentions_limit() {
        let err = ShellError::TimedOut {
            command: "node index.js".to_string(),
            limit: Duration::from_secs(60),
            output: String::new(),
        };
        assert_eq!(err.to_string(), "`node index.js` timed out after 60s");
    }

    #[test]
    fn test_output_accessor() {
        let err = ShellError::NonZeroExit {
            command: "false".to_string(),
            code: 1,
            output: "boom".to_string(),
        };
        assert_eq!(err.output(), Some("boom"));
        let err = ShellError::Cancelled {
            command: "sleep 10".to_string(),
        };
        assert_eq!(err.output(), None);
    }
}
