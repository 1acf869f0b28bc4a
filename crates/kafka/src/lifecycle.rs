use std::sync::atomic::{AtomicBool, Ordering};

/// One-way two-state flag.
///
/// Starts unset; [`OnceFlag::try_set`] flips it exactly once no matter how
/// many callers race on it. Producers and consumers use one per lifecycle
/// transition (started, closed).
#[derive(Debug, Default)]
pub struct OnceFlag(AtomicBool);

impl OnceFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag. Returns `true` only for the caller that performed the
    /// transition.
    pub fn try_set(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
