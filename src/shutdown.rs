//! Cooperative cancellation flags shared between threads.
//!
//! - `StopFlag`: "stop producing frames". Set by the operator interrupt or by
//!   the capture loop itself on a fatal device error.
//! - `ShutdownSignal`: set once the pipeline has drained; tells the weather
//!   logger to exit.
//!
//! Both are set-once: there is no reset, so a raised flag stays raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
struct Latch {
    flag: Arc<AtomicBool>,
}

impl Latch {
    fn raise(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Process-wide shutdown signal observed by the weather logger.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Latch);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Returns true only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        self.0.raise()
    }

    pub fn is_triggered(&self) -> bool {
        self.0.is_raised()
    }
}

/// Request to end frame production.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Latch);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that actually set it.
    pub fn request(&self) -> bool {
        self.0.raise()
    }

    pub fn is_requested(&self) -> bool {
        self.0.is_raised()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_is_set_once() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(observer.is_triggered());
    }

    #[test]
    fn stop_flag_is_shared_across_threads() {
        let stop = StopFlag::new();
        let remote = stop.clone();
        std::thread::spawn(move || {
            remote.request();
        })
        .join()
        .unwrap();
        assert!(stop.is_requested());
        assert!(!stop.request());
    }
}
