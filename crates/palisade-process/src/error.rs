//! Error types for subprocess execution.

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::output::StreamKind;

/// Errors that can occur while running a child process.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command vector was empty.
    #[error("command must contain at least one element")]
    EmptyCommand,

    /// An environment entry was not of the form `KEY=VALUE`.
    #[error("malformed environment entry (expected KEY=VALUE): {0}")]
    MalformedEnv(String),

    /// The child could not be started at all.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// Untrusted output contained bytes outside printable ASCII + newline.
    #[error("unsanitized data on {stream}")]
    TaintedOutput { stream: StreamKind },

    /// A structured log line carried a level name we do not know.
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),

    /// Neither sudo nor doas is available for a become request.
    #[error("unable to find a suitable program to change privileges")]
    MissingPrivilegeHelper,

    /// An output pump task panicked or was cancelled.
    #[error("output pump aborted: {0}")]
    PumpAborted(String),

    /// The child exited non-zero and wrote diagnostics to stderr; the
    /// message is the captured stderr content verbatim.
    #[error("{0}")]
    CommandFailed(String),

    /// The child exited non-zero without usable stderr.
    #[error("command exited unsuccessfully: {0}")]
    Exit(ExitStatus),

    /// Several independent failures from the same run, e.g. a pump error
    /// alongside the child's termination error.
    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ExecError>),

    /// IO error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Combine two errors into one, flattening nested [`ExecError::Multiple`]
    /// so the result is always a single-level list.
    pub fn join(self, other: ExecError) -> ExecError {
        match (self, other) {
            (ExecError::Multiple(mut left), ExecError::Multiple(right)) => {
                left.extend(right);
                ExecError::Multiple(left)
            }
            (ExecError::Multiple(mut left), right) => {
                left.push(right);
                ExecError::Multiple(left)
            }
            (left, ExecError::Multiple(mut right)) => {
                right.insert(0, left);
                ExecError::Multiple(right)
            }
            (left, right) => ExecError::Multiple(vec![left, right]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_flattens() {
        let joined = ExecError::EmptyCommand
            .join(ExecError::MissingPrivilegeHelper)
            .join(ExecError::UnknownLogLevel("loud".into()));

        match joined {
            ExecError::Multiple(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn multiple_display_joins_messages() {
        let joined = ExecError::EmptyCommand.join(ExecError::MissingPrivilegeHelper);
        let text = joined.to_string();
        assert!(text.contains("at least one element"));
        assert!(text.contains("; "));
        assert!(text.contains("change privileges"));
    }

    #[test]
    fn command_failed_display_is_verbatim() {
        let err = ExecError::CommandFailed("boom: no such table\n".into());
        assert_eq!(err.to_string(), "boom: no such table\n");
    }
}
