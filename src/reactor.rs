// src/reactor.rs
// Event reactor clock.

use std::time::Instant;

use parking_lot::Mutex;

pub trait Reactor: Send + Sync {
    /// Seconds since the reactor started.
    fn monotonic(&self) -> f64;
}

pub struct SystemReactor {
    start: Instant,
}

impl SystemReactor {
    pub fn new() -> Self {
        SystemReactor { start: Instant::now() }
    }
}

impl Default for SystemReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor for SystemReactor {
    fn monotonic(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// A reactor whose clock only moves when told to.
#[derive(Default)]
pub struct ManualReactor {
    now: Mutex<f64>,
}

impl ManualReactor {
    pub fn new(start_time: f64) -> Self {
        ManualReactor { now: Mutex::new(start_time) }
    }

    pub fn set_time(&self, time: f64) {
        *self.now.lock() = time;
    }

    pub fn advance(&self, delay_s: f64) {
        *self.now.lock() += delay_s;
    }
}

impl Reactor for ManualReactor {
    fn monotonic(&self) -> f64 {
        *self.now.lock()
    }
}
