//! Periodic progress gate.
//!
//! Long runs report progress once per period instead of once per item; the
//! gate is shared across worker threads.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct Throttle {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: Mutex::new(None) }
    }

    /// True at most once per period. The first call is always true.
    pub fn ready(&self) -> bool {
        let mut last = self.last.lock().expect("throttle lock poisoned");
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_fires() {
        let throttle = Throttle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_fires_again_after_period() {
        let throttle = Throttle::new(Duration::from_millis(0));
        assert!(throttle.ready());
        assert!(throttle.ready());
    }
}
