//! Millisecond time source used for every protocol deadline.
use std::{thread::sleep, time::Duration, time::Instant};

pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;
    fn delay_ms(&self, ms: u64);

    fn elapsed_since(&self, start_ms: u64) -> u64 {
        self.now_ms().saturating_sub(start_ms)
    }
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        sleep(Duration::from_millis(ms));
    }
}

/// Fake clock that moves forward by one millisecond every time it is read.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MockClock {
    now: std::cell::Cell<u64>,
}

#[cfg(test)]
impl MockClock {
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn peek(&self) -> u64 {
        self.now.get()
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.advance(1);
        self.now.get()
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}
