// LOMan - core/signal.rs
//
// One-shot cooperative stop request shared between a tile slot and the
// worker thread that drives the tile's server process.
//
// A fresh signal is created for every start cycle and dropped on stop; it is
// never reset, so a late observer of an old cycle can never see it cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Settable-once flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the stop. Returns `true` only for the call that set it.
    pub fn set(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_one_shot_and_shared() {
        let signal = StopSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_set());

        assert!(signal.set(), "first set reports the transition");
        assert!(!signal.set(), "second set is a no-op");
        assert!(observer.is_set());
    }

    #[test]
    fn test_fresh_signals_are_independent() {
        let old = StopSignal::new();
        old.set();
        let fresh = StopSignal::new();
        assert!(!fresh.is_set());
    }
}
