//! Logging setup for processes that may run confined.

use tracing_subscriber::EnvFilter;

use crate::state::ConfinementState;

/// Install the process-wide tracing subscriber.
///
/// A confined child logs single-line JSON to stderr; the parent's
/// structured-log sink parses each record and re-emits it through its own
/// subscriber, so styling is applied exactly once, in the outermost
/// process. An unconfined process gets a plain formatter. Both honor
/// `RUST_LOG` and default to `info`.
///
/// Calling this more than once is a no-op.
pub fn init_logging(state: &ConfinementState) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if state.is_sandboxed() {
        let _ = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init();
    }
}
