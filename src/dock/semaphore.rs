//! A bounded counting semaphore, hand-built on `Mutex`+`Condvar` the way the
//! teacher builds its own small synchronization helpers on top of `std`
//! rather than reaching for an extra crate. Backs the five per-dock permits
//! (version/isr/status/send/recv) described in spec for backpressure.

use std::sync::{Arc, Condvar, Mutex};

pub struct CountingSemaphore {
    state: Mutex<usize>,
    condvar: Condvar,
    capacity: usize,
}

impl CountingSemaphore {
    pub fn new(capacity: usize) -> Self {
        CountingSemaphore {
            state: Mutex::new(capacity),
            condvar: Condvar::new(),
            capacity,
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn take(&self) {
        let mut count = self.state.lock().unwrap();
        while *count == 0 {
            count = self.condvar.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Takes a permit only if one is immediately available.
    pub fn try_take(&self) -> bool {
        let mut count = self.state.lock().unwrap();
        if *count == 0 {
            false
        } else {
            *count -= 1;
            true
        }
    }

    /// Returns a permit, waking one waiter if any is blocked in `take`.
    pub fn give(&self) {
        let mut count = self.state.lock().unwrap();
        if *count < self.capacity {
            *count += 1;
            self.condvar.notify_one();
        }
    }

    /// Returns a guard that gives the permit back on drop, regardless of
    /// how the guarded job exits — the Rust analogue of the original's
    /// `giveGuard()` RAII helper.
    ///
    /// Takes `self` through an `Arc` rather than a plain reference so the
    /// guard owns its own handle on the semaphore instead of borrowing
    /// whatever struct embeds it — a `Dock` method holding a guard still
    /// needs `&mut self` for the exchange the permit guards.
    pub fn take_guard(self: &Arc<Self>) -> SemaphoreGuard {
        self.take();
        SemaphoreGuard { sem: Arc::clone(self) }
    }

    /// Like [`Self::take_guard`] but non-blocking; `None` if no permit was
    /// immediately available.
    pub fn try_take_guard(self: &Arc<Self>) -> Option<SemaphoreGuard> {
        if self.try_take() {
            Some(SemaphoreGuard { sem: Arc::clone(self) })
        } else {
            None
        }
    }
}

pub struct SemaphoreGuard {
    sem: Arc<CountingSemaphore>,
}

impl Drop for SemaphoreGuard {
    fn drop(&mut self) {
        self.sem.give();
    }
}
