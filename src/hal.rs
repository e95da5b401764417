//! Hardware abstraction traits standing in for the board-support calls the
//! original firmware makes directly against its SPI/GPIO drivers. Keeping
//! these as traits (rather than committing to one MCU SDK) is what lets
//! [`crate::testing`] provide a software loopback pair for integration
//! tests without a board attached.

use std::time::Duration;

/// A single, already-selected SPI device. One dock owns exactly one of
/// these. Transfers are blocking and fixed-size, mirroring the original's
/// use of ESP-IDF's blocking SPI transaction API.
pub trait SpiBus: Send {
    /// Sends `tx` and simultaneously reads `tx.len()` bytes into `rx`.
    /// `rx` must be at least as long as `tx`.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> std::io::Result<()>;
}

/// The dock's chip-select/interrupt line. On real hardware this is a single
/// open-drain GPIO pin doing double duty: driven low it acts as chip
/// select, and released it becomes a negative-edge interrupt input that the
/// other side can pull low to request the bus (see spec §4.2's role
/// arbitration).
pub trait ChipSelect: Send {
    /// Drives the line low (asserts chip select / claims the bus as
    /// master-for-this-exchange).
    fn assert_low(&mut self);

    /// Releases the line (returns it to open-drain, interrupt-armed input).
    fn release(&mut self);

    /// True if the peer has pulled the line low since it was last released
    /// — i.e. an interrupt is pending.
    fn is_interrupt_pending(&self) -> bool;

    /// Clears a pending interrupt without servicing it.
    fn clear_interrupt(&mut self);
}

/// A source of monotonic time and sleep, so [`crate::routing`]'s periodic
/// broadcast and [`crate::dock`]'s inter-phase guard delay can be driven by
/// a fake clock in tests instead of real wall time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    fn sleep(&self, dur: Duration);
}

/// [`Clock`] backed by `std::time`/`std::thread::sleep`, used outside of
/// tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock {
    started: Option<std::time::Instant>,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            started: Some(std::time::Instant::now()),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started
            .unwrap_or_else(std::time::Instant::now)
            .elapsed()
    }

    fn sleep(&self, dur: Duration) {
        std::thread::sleep(dur);
    }
}
