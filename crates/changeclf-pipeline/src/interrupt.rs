//! Operator cancellation.
//!
//! An [`InterruptFlag`] is shared between the Ctrl-C handler and the long
//! running loops. The loops poll it between examples and stop with
//! [`ChangeClfError::Interrupted`], which no per-pair skip path swallows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use changeclf_core::{ChangeClfError, Result};

/// Cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag (used by the signal handler).
    pub fn trigger(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the flag has been raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once the flag has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_raised() {
            Err(ChangeClfError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Route Ctrl-C to this flag. Only one handler may be installed per process.
    pub fn install_ctrlc_handler(&self) -> std::result::Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted!");
            flag.trigger();
        })
    }
}
