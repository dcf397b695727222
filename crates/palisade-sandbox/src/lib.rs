//! Namespace confinement for the current program.
//!
//! This crate does not implement an isolation mechanism of its own.
//! Instead it builds the argument vector for the external `bwrap` tool —
//! a black box reachable only through its command line and exit status —
//! and re-executes the current program inside the confinement `bwrap`
//! creates. The re-executed child sees an environment marker and
//! short-circuits further confinement, so the handoff happens exactly
//! once.
//!
//! # Security Model
//!
//! - Exposed paths are explicit: read-only, read-write, and device
//!   bindings accumulated one by one. Exposing the home directory or the
//!   filesystem root wholesale is rejected unconditionally.
//! - The child runs with all capabilities dropped and user/IPC/PID/UTS/
//!   cgroup namespaces unshared; the network is unshared unless sharing
//!   was requested.
//! - The real working directory is never mounted — a tmpfs with the same
//!   path keeps relative arguments resolving without exposing the tree.
//!
//! # Example
//!
//! ```no_run
//! use palisade_sandbox::{ConfinementState, SandboxBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = ConfinementState::from_env();
//!     palisade_sandbox::init_logging(&state);
//!
//!     if state.is_compatible() {
//!         let mut sandbox = SandboxBuilder::new(state)
//!             .share_net(true)
//!             .allow_common_paths(true)
//!             .add_read_write(["~/.cache/palisade"])?;
//!         // Never returns on a successful handoff; a no-op when this
//!         // process is already the confined child.
//!         sandbox.confine().await?;
//!     }
//!
//!     // ... the actual program, now running confined ...
//!     Ok(())
//! }
//! ```

mod builder;
mod error;
mod logging;
mod state;

pub use builder::{ConfinePhase, SandboxBuilder};
pub use error::SandboxError;
pub use logging::init_logging;
pub use state::{ACTIVE_ENV, ConfinementState, DEBUG_ENV, DISABLE_ENV, DebugGate};
