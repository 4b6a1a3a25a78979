//! Counting semaphore bounding concurrent packing computations.
//!
//! Packing is CPU- and memory-heavy; the pipeline caps simultaneous
//! computations at the worker count instead of letting every queued region
//! solve at once.

use parking_lot::{Condvar, Mutex};

pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self { permits: Mutex::new(permits.max(1)), released: Condvar::new() }
    }

    pub fn acquire(&self) -> SemaphorePermit<'_> {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.released.wait(&mut permits);
        }
        *permits -= 1;
        SemaphorePermit { semaphore: self }
    }
}

pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        *self.semaphore.permits.lock() += 1;
        self.semaphore.released.notify_one();
    }
}
