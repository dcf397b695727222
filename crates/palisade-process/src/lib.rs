//! Subprocess execution with sanitized output capture.
//!
//! This crate spawns child processes and drains their stdout/stderr through
//! pluggable [`OutputSink`] strategies. The two streams are pumped by
//! concurrent tasks — a child that fills one pipe while the other is unread
//! would deadlock a sequential reader — and pump failures are reconciled
//! with the child's exit status into a single error.
//!
//! # Security Model
//!
//! Captured output is **untrusted by default**: unless a spec is marked
//! trusted, every sink except [`OutputSink::Raw`] requires the stream to be
//! free of control bytes and terminal escapes (printable ASCII plus
//! newline). A violation is a hard error, never a silent substitution.
//!
//! # Example
//!
//! ```no_run
//! use palisade_process::{exec, ExecSpec, OutputSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = ExecSpec::new(["printf", "hello"])
//!         .with_stdout(OutputSink::ByteCapture)
//!         .trusted(true);
//!     let result = exec(spec).await?;
//!     assert_eq!(result.stdout, b"hello");
//!     Ok(())
//! }
//! ```

mod error;
mod exec;
mod output;
mod privilege;
mod sanitize;

pub use error::ExecError;
pub use exec::{ExecResult, ExecSpec, ExecStdin, exec};
pub use output::{LogLevel, OutputSink, StreamKind};
pub use privilege::privilege_prefix;
pub use sanitize::{is_sanitized, sanitize};
