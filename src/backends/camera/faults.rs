// SPDX-License-Identifier: GPL-3.0-only

//! Failure injection for the simulated hardware
//!
//! Each failure flag fires once: the next matching call fails and the flag
//! clears.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FaultInjector {
    open: AtomicBool,
    bind: AtomicBool,
    start_preview: AtomicBool,
    picture: AtomicBool,
    hold_focus: AtomicBool,
    release_delay_ms: AtomicU64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next device open fails
    pub fn fail_next_open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// The next attempt to attach the preview target fails
    pub fn fail_next_bind(&self) {
        self.bind.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_start_preview(&self) {
        self.start_preview.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_picture(&self) {
        self.picture.store(true, Ordering::SeqCst);
    }

    /// Keep focus scans from settling until released; not a one shot
    pub fn hold_focus(&self, hold: bool) {
        self.hold_focus.store(hold, Ordering::SeqCst);
    }

    /// Make device release take `delay`; zero releases at once
    pub fn set_release_delay(&self, delay: Duration) {
        self.release_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn take_open(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }

    pub fn take_bind(&self) -> bool {
        self.bind.swap(false, Ordering::SeqCst)
    }

    pub fn take_start_preview(&self) -> bool {
        self.start_preview.swap(false, Ordering::SeqCst)
    }

    pub fn take_picture(&self) -> bool {
        self.picture.swap(false, Ordering::SeqCst)
    }

    pub fn focus_held(&self) -> bool {
        self.hold_focus.load(Ordering::SeqCst)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faults_fire_once() {
        let faults = FaultInjector::new();
        assert!(!faults.take_open());
        faults.fail_next_open();
        assert!(faults.take_open());
        assert!(!faults.take_open());
    }

    #[test]
    fn test_release_delay() {
        let faults = FaultInjector::new();
        assert_eq!(faults.release_delay(), Duration::ZERO);
        faults.set_release_delay(Duration::from_millis(250));
        assert_eq!(faults.release_delay(), Duration::from_millis(250));
    }
}
