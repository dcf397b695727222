//! Output pump strategies for captured subprocess streams.
//!
//! Every child stream is drained by exactly one [`OutputSink`] running in
//! its own task until end-of-stream. Sinks are a closed set of variants
//! selected by configuration; each one decides how bytes are validated,
//! mirrored to this process's own streams, and accumulated into the
//! captured buffer returned to the caller.

use std::fmt;
use std::io;

use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

use crate::error::ExecError;
use crate::sanitize::is_sanitized;

/// Which of the child's streams a pump is draining. Mirrored output goes to
/// the matching stream of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Strategy for consuming one of a child's output streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputSink {
    /// Copy bytes verbatim to this process's matching stream as they
    /// arrive. Nothing is captured. Used when binary-safe passthrough
    /// matters more than inspectability.
    Raw,

    /// Buffer the entire stream, verify it is already sanitized (unless
    /// trusted), then mirror and return it. A verification mismatch is a
    /// hard error because the caller requires byte-exact fidelity.
    #[default]
    ByteCapture,

    /// Line-oriented capture: each line is verified (unless trusted),
    /// mirrored with a trailing newline, and accumulated.
    TextCapture,

    /// Line-oriented capture of structured log records (`level` + `msg`
    /// JSON fields). Non-fatal records are re-emitted through `tracing`;
    /// a fatal record discards everything accumulated so far so that only
    /// the fatal message reaches the caller.
    LogCapture,
}

impl OutputSink {
    /// Drain `reader` to end-of-stream and return the captured bytes.
    pub async fn consume<R>(
        self,
        reader: R,
        stream: StreamKind,
        trusted: bool,
    ) -> Result<Vec<u8>, ExecError>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            OutputSink::Raw => raw(reader, stream).await,
            OutputSink::ByteCapture => byte_capture(reader, stream, trusted).await,
            OutputSink::TextCapture => text_capture(reader, stream, trusted).await,
            OutputSink::LogCapture => log_capture(reader, stream, trusted).await,
        }
    }
}

async fn raw<R>(mut reader: R, stream: StreamKind) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    match stream {
        StreamKind::Stdout => {
            tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
        }
        StreamKind::Stderr => {
            tokio::io::copy(&mut reader, &mut tokio::io::stderr()).await?;
        }
    }
    Ok(Vec::new())
}

async fn byte_capture<R>(
    mut reader: R,
    stream: StreamKind,
    trusted: bool,
) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;

    if !trusted && !is_sanitized(&buf) {
        return Err(ExecError::TaintedOutput { stream });
    }

    mirror(stream, &buf).await?;
    Ok(buf)
}

async fn text_capture<R>(
    reader: R,
    stream: StreamKind,
    trusted: bool,
) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut data = Vec::new();

    while next_line(&mut reader, &mut line).await? {
        if !trusted && !is_sanitized(&line) {
            return Err(ExecError::TaintedOutput { stream });
        }

        line.push(b'\n');
        mirror(stream, &line).await?;
        data.extend_from_slice(&line);
    }

    Ok(data)
}

async fn log_capture<R>(
    reader: R,
    stream: StreamKind,
    trusted: bool,
) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut data = Vec::new();

    while next_line(&mut reader, &mut line).await? {
        if !trusted && !is_sanitized(&line) {
            return Err(ExecError::TaintedOutput { stream });
        }

        let record = parse_record(&line)?;

        if record.level == LogLevel::Fatal {
            // A fatal line becomes the error message once the non-zero exit
            // is reported; re-emitting it here would duplicate it, and any
            // earlier non-fatal lines would pollute that message.
            data.clear();
        } else {
            record.emit();
        }

        data.extend_from_slice(record.msg.as_bytes());
        data.push(b'\n');
    }

    Ok(data)
}

/// Read one line, byte-safe, stripping the trailing `\n` (and `\r`).
/// Returns false at end-of-stream.
async fn next_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    if reader.read_until(b'\n', line).await? == 0 {
        return Ok(false);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(true)
}

async fn mirror(stream: StreamKind, data: &[u8]) -> io::Result<()> {
    match stream {
        StreamKind::Stdout => {
            let mut out = tokio::io::stdout();
            out.write_all(data).await?;
            out.flush().await
        }
        StreamKind::Stderr => {
            let mut err = tokio::io::stderr();
            err.write_all(data).await?;
            err.flush().await
        }
    }
}

/// Severity of a structured log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse a level name, case-insensitively. Unknown names are an error
    /// rather than a guess.
    pub fn parse(name: &str) -> Result<LogLevel, ExecError> {
        match name.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(ExecError::UnknownLogLevel(other.to_string())),
        }
    }
}

struct LogRecord {
    level: LogLevel,
    msg: String,
    unstyled: bool,
}

impl LogRecord {
    fn emit(&self) {
        let msg = self.msg.as_str();
        let unstyled = self.unstyled;
        match self.level {
            LogLevel::Trace => tracing::trace!(unstyled, "{msg}"),
            LogLevel::Debug => tracing::debug!(unstyled, "{msg}"),
            LogLevel::Info => tracing::info!(unstyled, "{msg}"),
            LogLevel::Warn => tracing::warn!(unstyled, "{msg}"),
            LogLevel::Error => tracing::error!(unstyled, "{msg}"),
            LogLevel::Fatal => {}
        }
    }
}

fn parse_record(line: &[u8]) -> Result<LogRecord, ExecError> {
    let Ok(fields) = serde_json::from_slice::<Map<String, Value>>(line) else {
        // Not a structured record; the whole line becomes the message.
        return Ok(LogRecord {
            level: LogLevel::Info,
            msg: String::from_utf8_lossy(line).into_owned(),
            unstyled: true,
        });
    };

    let level = LogLevel::parse(field_str(&fields, "level").unwrap_or("info"))?;

    // tracing-subscriber's JSON formatter spells the field `message`.
    let msg = field_str(&fields, "msg")
        .or_else(|| field_str(&fields, "message"))
        .unwrap_or("n/a")
        .to_string();

    Ok(LogRecord {
        level,
        msg,
        unstyled: false,
    })
}

fn field_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn raw_captures_nothing() {
        let out = OutputSink::Raw
            .consume(&b"binary \xff\x00 noise"[..], StreamKind::Stdout, false)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn byte_capture_round_trips_clean_input() {
        let input = b"plain output\nsecond line\n";
        let out = OutputSink::ByteCapture
            .consume(&input[..], StreamKind::Stdout, false)
            .await
            .unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn byte_capture_rejects_tainted_untrusted_input() {
        let err = OutputSink::ByteCapture
            .consume(&b"\x1b[31mred\x1b[0m"[..], StreamKind::Stdout, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::TaintedOutput {
                stream: StreamKind::Stdout
            }
        ));
    }

    #[tokio::test]
    async fn byte_capture_passes_tainted_trusted_input() {
        let input = b"\x1b[31mred\x1b[0m";
        let out = OutputSink::ByteCapture
            .consume(&input[..], StreamKind::Stdout, true)
            .await
            .unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn text_capture_accumulates_lines_with_newlines() {
        let out = OutputSink::TextCapture
            .consume(&b"one\ntwo\r\nthree"[..], StreamKind::Stdout, false)
            .await
            .unwrap();
        assert_eq!(out, b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn text_capture_rejects_tainted_line() {
        let err = OutputSink::TextCapture
            .consume(&b"fine\nbad\x07bell\n"[..], StreamKind::Stderr, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::TaintedOutput {
                stream: StreamKind::Stderr
            }
        ));
    }

    #[tokio::test]
    async fn log_capture_collects_messages() {
        let input = b"{\"level\":\"info\",\"msg\":\"starting\"}\n{\"level\":\"debug\",\"msg\":\"detail\"}\n";
        let out = OutputSink::LogCapture
            .consume(&input[..], StreamKind::Stderr, false)
            .await
            .unwrap();
        assert_eq!(out, b"starting\ndetail\n");
    }

    #[tokio::test]
    async fn log_capture_fatal_discards_earlier_lines() {
        let input = b"{\"level\":\"info\",\"msg\":\"progress\"}\n{\"level\":\"fatal\",\"msg\":\"doom\"}\n";
        let out = OutputSink::LogCapture
            .consume(&input[..], StreamKind::Stderr, false)
            .await
            .unwrap();
        assert_eq!(out, b"doom\n");
    }

    #[tokio::test]
    async fn log_capture_unparseable_line_is_kept_verbatim() {
        let out = OutputSink::LogCapture
            .consume(&b"not json at all\n"[..], StreamKind::Stderr, false)
            .await
            .unwrap();
        assert_eq!(out, b"not json at all\n");
    }

    #[tokio::test]
    async fn log_capture_defaults_missing_fields() {
        let out = OutputSink::LogCapture
            .consume(&b"{\"other\":1}\n"[..], StreamKind::Stderr, false)
            .await
            .unwrap();
        assert_eq!(out, b"n/a\n");
    }

    #[tokio::test]
    async fn log_capture_accepts_message_spelling() {
        let input = b"{\"level\":\"INFO\",\"message\":\"from tracing\"}\n";
        let out = OutputSink::LogCapture
            .consume(&input[..], StreamKind::Stderr, false)
            .await
            .unwrap();
        assert_eq!(out, b"from tracing\n");
    }

    #[tokio::test]
    async fn log_capture_rejects_unknown_level() {
        let err = OutputSink::LogCapture
            .consume(&b"{\"level\":\"loud\",\"msg\":\"x\"}\n"[..], StreamKind::Stderr, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::UnknownLogLevel(name) if name == "loud"));
    }

    #[test]
    fn level_parsing_is_case_insensitive() {
        assert_eq!(LogLevel::parse("WARN").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::parse("warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::parse("Fatal").unwrap(), LogLevel::Fatal);
        assert!(LogLevel::parse("panic").is_err());
    }
}
