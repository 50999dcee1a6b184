//! Cooperative cancellation for discovery, toolchain installs and running
//! `protoc` invocations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::error::Result;

/// Exit code used when a second interrupt arrives before the first one
/// has been honored.
const FORCED_EXIT_CODE: i32 = 130;

static SIGNALED: AtomicBool = AtomicBool::new(false);

/// Shared cancellation flag.
///
/// Clones share state. A token also reports cancelled once
/// [`install_signal_handlers`] has seen SIGINT or SIGTERM.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || SIGNALED.load(Ordering::SeqCst)
    }
}

/// Routes SIGINT and SIGTERM to every [`CancelToken`] in the process.
///
/// Directory walks, install lock waits and running invocations notice the
/// first signal and stop with a cancelled error. A second signal exits the
/// process immediately.
pub fn install_signal_handlers() -> Result<()> {
    ctrlc::set_handler(|| {
        if SIGNALED.swap(true, Ordering::SeqCst) {
            std::process::exit(FORCED_EXIT_CODE);
        }
        warn!("interrupted, stopping");
    })?;
    Ok(())
}
