//! Construction of the bubblewrap argument vector and the one-way
//! confinement handoff.

use std::env;
use std::path::{Path, PathBuf};

use palisade_process::{ExecSpec, ExecStdin, OutputSink, exec};

use crate::error::SandboxError;
use crate::state::{ACTIVE_ENV, ConfinementState};

/// The external confinement tool. Treated as a black box: everything it
/// does is requested through the argument vector built here.
const BWRAP: &str = "bwrap";

/// Read-only bindings shared by most programs, enabled as a block.
const COMMON_PATHS: [&str; 10] = [
    "/etc/passwd",
    "/etc/hosts",
    "/etc/resolv.conf",
    "/etc/nsswitch.conf",
    "/etc/os-release",
    "/bin",
    "/usr",
    "/lib",
    "/lib32",
    "/lib64",
];

/// Where a confinement attempt currently stands. The handoff is a state
/// transition rather than an implicit exit call so it stays observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfinePhase {
    /// No confinement attempted (also the resting state of a process that
    /// is already confined and short-circuits).
    Unconfined,
    /// Argument construction and launch in progress.
    Confining,
    /// The confined child ran; the parent's only remaining job is to
    /// terminate with its status. Terminal.
    ConfinedChildRunning,
    /// Construction or launch failed; no child survives. Terminal.
    Failed,
}

/// Accumulates paths and toggles, then re-executes the current program —
/// or an explicit inner command — under the confinement tool.
///
/// Paths are expanded (`~`, then absolute resolution) as they are added;
/// exposing the home directory or the filesystem root is rejected
/// outright. Read-only and device paths that do not exist are dropped
/// best-effort, while a read-write path is rewritten to its nearest
/// existing ancestor so that files created later still land inside a
/// writable directory.
#[derive(Debug)]
pub struct SandboxBuilder {
    state: ConfinementState,
    phase: ConfinePhase,
    command: Vec<String>,
    env: Option<Vec<String>>,
    read_only: Vec<PathBuf>,
    read_write: Vec<PathBuf>,
    device: Vec<PathBuf>,
    allow_common_paths: bool,
    tmpfs: bool,
    devtmpfs: bool,
    procfs: bool,
    share_net: bool,
    stdin: ExecStdin,
    stdout: OutputSink,
    stderr: OutputSink,
}

impl SandboxBuilder {
    /// Create a builder with nothing exposed and nothing shared.
    ///
    /// The confined child is this same program, so stdin is handed
    /// through, its stdout is passed on byte-for-byte, and its stderr is
    /// expected to carry structured log records (see
    /// [`crate::init_logging`]) which are re-emitted here in the parent.
    pub fn new(state: ConfinementState) -> Self {
        Self {
            state,
            phase: ConfinePhase::Unconfined,
            command: Vec::new(),
            env: None,
            read_only: Vec::new(),
            read_write: Vec::new(),
            device: Vec::new(),
            allow_common_paths: false,
            tmpfs: false,
            devtmpfs: false,
            procfs: false,
            share_net: false,
            stdin: ExecStdin::Inherit,
            stdout: OutputSink::Raw,
            stderr: OutputSink::LogCapture,
        }
    }

    /// Run an explicit command instead of re-executing this program.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the child's environment with the given `KEY=VALUE` entries.
    /// The confinement marker is appended either way.
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Mount a tmpfs at `/tmp`.
    pub fn with_tmpfs(mut self, enabled: bool) -> Self {
        self.tmpfs = enabled;
        self
    }

    /// Mount a device filesystem at `/dev`.
    pub fn with_devtmpfs(mut self, enabled: bool) -> Self {
        self.devtmpfs = enabled;
        self
    }

    /// Mount a process filesystem at `/proc`.
    pub fn with_procfs(mut self, enabled: bool) -> Self {
        self.procfs = enabled;
        self
    }

    /// Keep the network namespace shared with the host.
    pub fn share_net(mut self, enabled: bool) -> Self {
        self.share_net = enabled;
        self
    }

    /// Bind the common read-only system paths (passwd, hosts, resolver
    /// configuration, and the standard library/binary directories).
    pub fn allow_common_paths(mut self, enabled: bool) -> Self {
        self.allow_common_paths = enabled;
        self
    }

    /// Set the child's input wiring.
    pub fn with_stdin(mut self, stdin: ExecStdin) -> Self {
        self.stdin = stdin;
        self
    }

    /// Select the sink for the child's stdout.
    pub fn with_stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Select the sink for the child's stderr.
    pub fn with_stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Expose paths read-only. Paths that do not exist are dropped.
    pub fn add_read_only<I, P>(mut self, paths: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            if path.as_os_str().is_empty() {
                continue;
            }
            let expanded = expand(path)?;
            if expanded.exists() {
                self.read_only.push(expanded);
            }
        }
        Ok(self)
    }

    /// Expose paths read-write. A path that does not exist yet is
    /// replaced by its nearest existing ancestor: a file created under a
    /// not-yet-created directory still needs its containing directory to
    /// be writable inside the confinement.
    pub fn add_read_write<I, P>(mut self, paths: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            if path.as_os_str().is_empty() {
                continue;
            }
            let mut expanded = expand(path)?;
            while !expanded.exists() {
                match expanded.parent() {
                    Some(parent) => expanded = parent.to_path_buf(),
                    None => break,
                }
            }
            self.read_write.push(expanded);
        }
        Ok(self)
    }

    /// Expose device paths. Paths that do not exist are dropped.
    pub fn add_device<I, P>(mut self, paths: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            if path.as_os_str().is_empty() {
                continue;
            }
            let expanded = expand(path)?;
            if expanded.exists() {
                self.device.push(expanded);
            }
        }
        Ok(self)
    }

    /// The recorded read-only paths, in insertion order.
    pub fn read_only_paths(&self) -> &[PathBuf] {
        &self.read_only
    }

    /// The recorded read-write paths, in insertion order.
    pub fn read_write_paths(&self) -> &[PathBuf] {
        &self.read_write
    }

    /// The recorded device paths, in insertion order.
    pub fn device_paths(&self) -> &[PathBuf] {
        &self.device
    }

    /// Where the last confinement attempt stands.
    pub fn phase(&self) -> ConfinePhase {
        self.phase
    }

    /// Build the full argument vector for the confinement tool.
    ///
    /// Flag names and the position of the bind flags before the trailing
    /// command are the wire contract with the tool; the ordering here is
    /// load-bearing.
    pub fn command_line(&self) -> Result<Vec<String>, SandboxError> {
        let exe = std::path::absolute(env::current_exe()?)?;

        // The work directory must exist inside the confinement so relative
        // paths keep resolving. The real directory is never mounted; a
        // tmpfs with the same path takes its place.
        let cwd = env::current_dir()?;

        let mut args: Vec<String> = vec![
            BWRAP.to_string(),
            "--new-session".to_string(),
            "--die-with-parent".to_string(),
            "--unshare-user".to_string(),
            "--unshare-ipc".to_string(),
            "--unshare-pid".to_string(),
            "--unshare-uts".to_string(),
            "--unshare-cgroup".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--tmpfs".to_string(),
            path_arg(&cwd),
        ];

        if self.devtmpfs {
            args.extend(["--dev".to_string(), "/dev".to_string()]);
            tracing::debug!("sandbox: devtmpfs enabled");
        }

        if self.procfs {
            args.extend(["--proc".to_string(), "/proc".to_string()]);
            tracing::debug!("sandbox: procfs enabled");
        }

        if self.tmpfs {
            args.extend(["--tmpfs".to_string(), "/tmp".to_string()]);
            tracing::debug!("sandbox: tmpfs enabled");
        }

        if !self.share_net {
            args.push("--unshare-net".to_string());
        } else {
            tracing::debug!("sandbox: net enabled");
        }

        if self.allow_common_paths {
            for path in COMMON_PATHS {
                args.extend([
                    "--ro-bind-try".to_string(),
                    path.to_string(),
                    path.to_string(),
                ]);
            }
            args.extend(["--ro-bind".to_string(), path_arg(&exe), path_arg(&exe)]);
        }

        // Joint deduplication across the three sets: a path claimed
        // read-write is never additionally bound read-only or as a device.
        let mut seen: Vec<&Path> = Vec::new();

        for path in &self.read_write {
            if !seen.contains(&path.as_path()) {
                args.extend(["--bind".to_string(), path_arg(path), path_arg(path)]);
                tracing::debug!(path = %path.display(), "sandbox: rw");
                seen.push(path);
            }
        }

        for path in &self.read_only {
            if !seen.contains(&path.as_path()) {
                args.extend(["--ro-bind".to_string(), path_arg(path), path_arg(path)]);
                tracing::debug!(path = %path.display(), "sandbox: ro");
                seen.push(path);
            }
        }

        for path in &self.device {
            if !seen.contains(&path.as_path()) {
                args.extend(["--dev-bind".to_string(), path_arg(path), path_arg(path)]);
                tracing::debug!(path = %path.display(), "sandbox: dev");
                seen.push(path);
            }
        }

        if self.command.is_empty() {
            args.push(path_arg(&exe));
            args.extend(env::args().skip(1));
        } else {
            args.extend(self.command.iter().cloned());
        }

        Ok(args)
    }

    /// Hand this process off to a confined copy of itself.
    ///
    /// A no-op when the process is already confined — the inherited
    /// marker short-circuits before any argument vector is built, which
    /// is what stops re-entrant confinement. Otherwise the confinement
    /// tool is launched with the marker appended to the child
    /// environment, and on success the parent terminates with the
    /// child's success status: this call does not return. On failure the
    /// phase is [`ConfinePhase::Failed`] and the error is returned.
    pub async fn confine(&mut self) -> Result<(), SandboxError> {
        if self.state.is_sandboxed() {
            return Ok(());
        }

        self.phase = ConfinePhase::Confining;

        let args = match self.command_line() {
            Ok(args) => args,
            Err(err) => {
                self.phase = ConfinePhase::Failed;
                return Err(err);
            }
        };

        let mut env: Vec<String> = match &self.env {
            Some(env) => env.clone(),
            None => env::vars_os()
                .map(|(key, value)| {
                    format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
                })
                .collect(),
        };
        env.push(format!("{ACTIVE_ENV}=1"));

        let spec = ExecSpec::new(args)
            .with_env(env)
            .with_stdin(self.stdin.clone())
            .with_stdout(self.stdout)
            .with_stderr(self.stderr);

        tracing::trace!("sandbox: starting confined subprocess...");
        match exec(spec).await {
            Ok(_) => {
                self.phase = ConfinePhase::ConfinedChildRunning;
                // One-way handoff: the confined child has done all the
                // work this process was going to do.
                std::process::exit(0);
            }
            Err(err) => {
                self.phase = ConfinePhase::Failed;
                Err(err.into())
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Expand `~`, resolve to an absolute path, and reject wholesale exposure
/// of the home directory or the filesystem root.
fn expand(path: &Path) -> Result<PathBuf, SandboxError> {
    let home = dirs::home_dir().ok_or(SandboxError::NoHomeDir)?;

    let path = match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    };

    let path = std::path::absolute(&path).map_err(|source| SandboxError::Expand {
        path: path.clone(),
        source,
    })?;

    if path == home || path == Path::new("/") {
        return Err(SandboxError::ForbiddenPath(path));
    }

    Ok(path)
}
