//! Process-wide confinement state and debug-attach coordination.

use std::env;
use std::path::Path;

use parking_lot::{Condvar, Mutex};

/// Marker a parent sets on its confined child's environment. Only the
/// literal value `1` counts as set.
pub const ACTIVE_ENV: &str = "PALISADE_SANDBOX_ACTIVE";

/// Manual opt-out marker: confinement is reported incompatible when set.
pub const DISABLE_ENV: &str = "PALISADE_SANDBOX_DISABLE";

/// Marker requesting a debug-attach wait at startup.
pub const DEBUG_ENV: &str = "PALISADE_SANDBOX_DEBUG";

/// Container runtime marker files; confinement inside docker or podman is
/// pointless and usually impossible.
const CONTAINER_MARKERS: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Confinement-related facts about the current process, captured once at
/// construction and immutable afterwards. Construct it at process start
/// with [`ConfinementState::from_env`] and pass it to whatever needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfinementState {
    sandboxed: bool,
    compatible: bool,
    debug_requested: bool,
}

impl ConfinementState {
    /// Capture the state from the process environment and platform.
    pub fn from_env() -> Self {
        Self {
            sandboxed: env_flag(ACTIVE_ENV),
            compatible: cfg!(target_os = "linux") && !env_flag(DISABLE_ENV) && !inside_container(),
            debug_requested: env_flag(DEBUG_ENV),
        }
    }

    /// Explicit construction, for embedding and tests.
    pub fn new(sandboxed: bool, compatible: bool, debug_requested: bool) -> Self {
        Self {
            sandboxed,
            compatible,
            debug_requested,
        }
    }

    /// Whether this process is already running inside a confinement.
    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    /// Whether confinement can work here at all: Linux, not inside a
    /// container runtime, and not manually disabled.
    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    /// Whether a debug-attach wait was requested at startup.
    pub fn debug_requested(&self) -> bool {
        self.debug_requested
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| value == "1")
}

fn inside_container() -> bool {
    CONTAINER_MARKERS
        .iter()
        .any(|marker| Path::new(marker).exists())
}

/// Blocks a process until a debugger flips the attached flag.
///
/// A condition variable replaces the fixed-interval poll loop this used to
/// be modeled on: [`DebugGate::wait`] parks until [`DebugGate::release`]
/// is called, either by another thread or by a debugger evaluating it.
#[derive(Debug, Default)]
pub struct DebugGate {
    attached: Mutex<bool>,
    signal: Condvar,
}

impl DebugGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the calling thread until the gate is released.
    pub fn wait(&self) {
        tracing::info!("waiting for debugger to release the gate...");
        let mut attached = self.attached.lock();
        while !*attached {
            self.signal.wait(&mut attached);
        }
    }

    /// Release every current and future waiter.
    pub fn release(&self) {
        let mut attached = self.attached.lock();
        *attached = true;
        self.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn explicit_state_round_trips() {
        let state = ConfinementState::new(true, false, true);
        assert!(state.is_sandboxed());
        assert!(!state.is_compatible());
        assert!(state.debug_requested());
    }

    #[test]
    fn env_flag_requires_the_literal_one() {
        // A test-only variable name so parallel tests cannot interfere.
        let name = "PALISADE_TEST_ENV_FLAG";
        assert!(!env_flag(name));

        for (value, expected) in [("1", true), ("0", false), ("true", false), ("", false)] {
            unsafe { env::set_var(name, value) };
            assert_eq!(env_flag(name), expected, "value {value:?}");
        }

        unsafe { env::remove_var(name) };
        assert!(!env_flag(name));
    }

    #[test]
    fn debug_gate_release_unblocks_wait() {
        let gate = Arc::new(DebugGate::new());

        let waiter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.wait())
        };

        std::thread::sleep(Duration::from_millis(50));
        gate.release();
        waiter.join().unwrap();
    }

    #[test]
    fn released_gate_does_not_block_later_waiters() {
        let gate = DebugGate::new();
        gate.release();
        gate.wait();
    }
}
