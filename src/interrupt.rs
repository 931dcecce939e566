//! Signal handling (spec §5): Foundry is a long-running daemon rather than
//! an interactive session, so it registers both SIGINT and SIGTERM and
//! treats either as a request for a graceful halt at the next iteration
//! boundary rather than an immediate abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static SHUTDOWN_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Registers handlers for SIGINT and SIGTERM that set a shared flag rather
/// than terminating the process directly — the control loop checks it only
/// at iteration boundaries (spec §5, "cancellation is cooperative").
pub fn register_signal_handlers() -> anyhow::Result<()> {
    let flag = SHUTDOWN_FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(flag))?;
    Ok(())
}

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_FLAG
        .get()
        .map(|f| f.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Test-only: resets the flag so unit tests don't leak state into each other.
#[cfg(test)]
pub fn clear_for_test() {
    if let Some(f) = SHUTDOWN_FLAG.get() {
        f.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn defaults_to_not_requested() {
        clear_for_test();
        assert!(!is_shutdown_requested());
    }

    #[test]
    fn register_is_idempotent() {
        register_signal_handlers().unwrap();
        register_signal_handlers().unwrap();
        clear_for_test();
    }

    #[test]
    fn flag_flips_when_set_directly() {
        register_signal_handlers().unwrap();
        let flag = SHUTDOWN_FLAG.get().unwrap();
        flag.store(true, Ordering::Relaxed);
        assert!(is_shutdown_requested());
        clear_for_test();
    }
}
