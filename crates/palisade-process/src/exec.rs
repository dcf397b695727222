//! Child process execution with concurrently pumped output streams.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinError;

use crate::error::ExecError;
use crate::output::{OutputSink, StreamKind};
use crate::privilege::privilege_prefix;

/// Input wiring for a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExecStdin {
    /// The child reads from the null device.
    #[default]
    Null,
    /// The child inherits this process's stdin.
    Inherit,
    /// The bytes are written to the child's stdin, which is then closed.
    Bytes(Vec<u8>),
}

/// Specification for a single child process run.
///
/// Invariant: `command` must contain at least one element; [`exec`] rejects
/// an empty command before touching the system.
#[derive(Debug, Clone)]
pub struct ExecSpec {
    /// Program and arguments.
    pub command: Vec<String>,
    /// `KEY=VALUE` entries replacing the inherited environment, or `None`
    /// to inherit.
    pub env: Option<Vec<String>>,
    /// Working directory; the caller's when unset.
    pub cwd: Option<PathBuf>,
    /// Input wiring.
    pub stdin: ExecStdin,
    /// Sink draining the child's stdout.
    pub stdout: OutputSink,
    /// Sink draining the child's stderr.
    pub stderr: OutputSink,
    /// Report a non-zero exit through [`ExecResult::exit_code`] instead of
    /// an error.
    pub ignore_exit_error: bool,
    /// Skip sanitization checks on captured output.
    pub trusted: bool,
    /// Run as this user via a privilege-elevation helper.
    pub become_user: Option<String>,
}

impl ExecSpec {
    /// Create a spec for `command` with capture-everything defaults.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            env: None,
            cwd: None,
            stdin: ExecStdin::Null,
            stdout: OutputSink::ByteCapture,
            stderr: OutputSink::ByteCapture,
            ignore_exit_error: false,
            trusted: false,
            become_user: None,
        }
    }

    /// Replace the child's environment with the given `KEY=VALUE` entries.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set the child's working directory.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the child's input wiring.
    pub fn with_stdin(mut self, stdin: ExecStdin) -> Self {
        self.stdin = stdin;
        self
    }

    /// Select the stdout sink.
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Select the stderr sink.
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Surface a non-zero exit code in the result instead of an error.
    pub fn ignore_exit_error(mut self, ignore: bool) -> Self {
        self.ignore_exit_error = ignore;
        self
    }

    /// Mark the child's output as trusted, skipping sanitization checks.
    pub fn trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Run the command as `user` via a privilege-elevation helper.
    pub fn become_user(mut self, user: impl Into<String>) -> Self {
        self.become_user = Some(user.into());
        self
    }
}

/// Captured output and exit status of a completed child. Created once per
/// [`exec`] call and immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Bytes captured from the child's stdout.
    pub stdout: Vec<u8>,
    /// Bytes captured from the child's stderr.
    pub stderr: Vec<u8>,
    /// The child's exit code. Zero on success; only ever non-zero when the
    /// spec asked for exit errors to be ignored.
    pub exit_code: i32,
}

/// Run a child process to completion.
///
/// The two output streams are drained by concurrent pump tasks — a child
/// that fills one pipe while the other goes unread would otherwise
/// deadlock. The exit status is only collected after both pumps have seen
/// end-of-stream, and a pump failure never suppresses reaping the child:
/// both failures are combined into one error.
///
/// A non-zero exit is reported as an error whose text is the captured
/// stderr when there is any (the most useful diagnostic available),
/// unless the spec requested the code to be surfaced in the result.
pub async fn exec(spec: ExecSpec) -> Result<ExecResult, ExecError> {
    if spec.command.is_empty() {
        return Err(ExecError::EmptyCommand);
    }

    let argv = match &spec.become_user {
        Some(user) => {
            let mut prefix = privilege_prefix(user)?;
            prefix.extend(spec.command.iter().cloned());
            prefix
        }
        None => spec.command.clone(),
    };

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);

    if let Some(env) = &spec.env {
        cmd.env_clear();
        for entry in env {
            match entry.split_once('=') {
                Some((key, value)) => {
                    cmd.env(key, value);
                }
                None => return Err(ExecError::MalformedEnv(entry.clone())),
            }
        }
    }

    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    cmd.stdin(match &spec.stdin {
        ExecStdin::Null => Stdio::null(),
        ExecStdin::Inherit => Stdio::inherit(),
        ExecStdin::Bytes(_) => Stdio::piped(),
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    tracing::trace!(command = %argv.join(" "), "exec");
    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        command: argv[0].clone(),
        source,
    })?;

    let stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Io(io::Error::other("child stdout was not piped")))?;
    let stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Io(io::Error::other("child stderr was not piped")))?;

    let trusted = spec.trusted;
    let (stdout_sink, stderr_sink) = (spec.stdout, spec.stderr);
    let stdout_pump =
        tokio::spawn(
            async move { stdout_sink.consume(stdout_pipe, StreamKind::Stdout, trusted).await },
        );
    let stderr_pump =
        tokio::spawn(
            async move { stderr_sink.consume(stderr_pipe, StreamKind::Stderr, trusted).await },
        );

    let feeder = match spec.stdin {
        ExecStdin::Bytes(bytes) => {
            let mut handle = child
                .stdin
                .take()
                .ok_or_else(|| ExecError::Io(io::Error::other("child stdin was not piped")))?;
            Some(tokio::spawn(async move {
                // A child that exits without reading its input is not an
                // error; anything else on the feed is.
                match handle.write_all(&bytes).await {
                    Ok(()) => handle.shutdown().await.or_else(ignore_broken_pipe),
                    Err(err) => ignore_broken_pipe(err),
                }
            }))
        }
        _ => None,
    };

    let (stdout_res, stderr_res) = tokio::join!(stdout_pump, stderr_pump);

    let mut result = ExecResult::default();
    let mut pump_err: Option<ExecError> = None;

    match flatten_pump(stdout_res) {
        Ok(buf) => result.stdout = buf,
        Err(err) => push_err(&mut pump_err, err),
    }
    match flatten_pump(stderr_res) {
        Ok(buf) => result.stderr = buf,
        Err(err) => push_err(&mut pump_err, err),
    }

    if let Some(feed) = feeder {
        match feed.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => push_err(&mut pump_err, ExecError::Io(err)),
            Err(join_err) => push_err(&mut pump_err, ExecError::PumpAborted(join_err.to_string())),
        }
    }

    if let Some(err) = pump_err {
        // The child still has to be reaped; joining the outcomes keeps the
        // termination status visible next to the pump failure.
        let err = match child.wait().await {
            Ok(status) if status.success() => err,
            Ok(status) => err.join(ExecError::Exit(status)),
            Err(wait_err) => err.join(ExecError::Io(wait_err)),
        };
        return Err(err);
    }

    let status = child.wait().await?;
    if !status.success() {
        if spec.ignore_exit_error {
            result.exit_code = status.code().unwrap_or(-1);
            return Ok(result);
        }
        if !result.stderr.is_empty() {
            return Err(ExecError::CommandFailed(
                String::from_utf8_lossy(&result.stderr).into_owned(),
            ));
        }
        return Err(ExecError::Exit(status));
    }

    Ok(result)
}

fn flatten_pump(
    res: Result<Result<Vec<u8>, ExecError>, JoinError>,
) -> Result<Vec<u8>, ExecError> {
    match res {
        Ok(inner) => inner,
        Err(join_err) => Err(ExecError::PumpAborted(join_err.to_string())),
    }
}

fn push_err(slot: &mut Option<ExecError>, err: ExecError) {
    *slot = Some(match slot.take() {
        Some(existing) => existing.join(err),
        None => err,
    });
}

fn ignore_broken_pipe(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::BrokenPipe {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec = ExecSpec::new(["true"]);
        assert_eq!(spec.stdout, OutputSink::ByteCapture);
        assert_eq!(spec.stderr, OutputSink::ByteCapture);
        assert_eq!(spec.stdin, ExecStdin::Null);
        assert!(!spec.ignore_exit_error);
        assert!(!spec.trusted);
        assert!(spec.env.is_none());
        assert!(spec.become_user.is_none());
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let err = exec(ExecSpec::new(Vec::<String>::new())).await.unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn malformed_env_is_rejected() {
        let spec = ExecSpec::new(["true"]).with_env(vec!["NOT_A_PAIR".into()]);
        let err = exec(spec).await.unwrap_err();
        assert!(matches!(err, ExecError::MalformedEnv(entry) if entry == "NOT_A_PAIR"));
    }

    #[tokio::test]
    async fn missing_executable_fails_fast() {
        let err = exec(ExecSpec::new(["/nonexistent/palisade-test-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
