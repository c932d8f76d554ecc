// src/dev_utils.rs

//! Debug-only profiling helpers.

use std::time::Instant;

/// A simple RAII timer for profiling blocks of code.
/// When dropped it logs the elapsed time at `debug` level, so it costs
/// nothing visible unless `RUST_LOG=debug` is set.
#[derive(Debug)]
pub struct BlockTimer {
    name: &'static str,
    start: Instant,
}

impl BlockTimer {
    /// Creates a new timer and starts it immediately.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for BlockTimer {
    fn drop(&mut self) {
        log::debug!(
            "PROFILE [{}]: {} µs",
            self.name,
            self.start.elapsed().as_micros()
        );
    }
}
