//! Error types for sandbox construction and confinement.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use palisade_process::ExecError;

/// Errors that can occur while building or entering a confinement.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Exposing the home directory or the filesystem root wholesale is
    /// disallowed, regardless of access kind.
    #[error("sharing {} is not allowed", .0.display())]
    ForbiddenPath(PathBuf),

    /// The home directory could not be determined, so neither `~`
    /// expansion nor the forbidden-path check can run.
    #[error("unable to determine the home directory")]
    NoHomeDir,

    /// A path could not be resolved to an absolute form.
    #[error("failed to resolve {}: {source}", .path.display())]
    Expand {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Launching the confinement tool failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// IO error.
    #[error(transparent)]
    Io(#[from] io::Error),
}
