//! Transport and clock contracts
//!
//! The byte-level bus transport is provided by the platform. muxnet only
//! assumes the Arduino-`Wire`-shaped primitives below, one [`Wire`] per
//! physical bus, plus a [`Clock`] for bounded busy-waits.
//!
//! Implementations are driven from a single thread; between a sub-bus
//! switch and its matching reset no other logical operation may run on
//! the same wire.

use std::time::{Duration, Instant};

/// Byte-level transport for one physical bus
pub trait Wire: Send {
    /// One-time bus initialization
    fn begin(&mut self);

    /// Open a write transaction to a 7-bit address
    fn begin_transmission(&mut self, address: u8);

    /// Queue bytes for the open transaction, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Close the open transaction, returning whether the target acknowledged
    ///
    /// With `stop == false` the bus is held for a repeated start.
    fn end_transmission(&mut self, stop: bool) -> bool;

    /// Request `count` bytes from a 7-bit address, returning how many arrived
    fn request_from(&mut self, address: u8, count: usize, stop: bool) -> usize;

    /// Take the next received byte
    fn read(&mut self) -> Option<u8>;

    /// Largest transfer the transport buffers in one transaction
    fn buffer_size(&self) -> usize {
        32
    }

    /// Get the wire name (for logging)
    fn name(&self) -> &str {
        "wire"
    }
}

/// Monotonic time source used for bounded polling
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;

    /// Block for (at least) the given duration
    fn delay(&mut self, duration: Duration);
}

/// [`Clock`] backed by the host's monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is "now"
    pub fn new() -> Self {
        Self {
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
