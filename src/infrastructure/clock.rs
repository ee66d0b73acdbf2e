//! Wall-clock time source.
//!
//! Window timestamps are compared across serving instances that share a
//! Redis store, so admission runs on `SystemTime` rather than a monotonic
//! clock. Tests substitute `MockClock` from `crate::infrastructure::mocks`.

use crate::application::ports::Clock;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::window::WindowTimestamp;
    use std::time::Duration;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let before = WindowTimestamp::from_system_time(clock.now());
        std::thread::sleep(Duration::from_millis(5));
        let after = WindowTimestamp::from_system_time(clock.now());

        assert!(before.as_micros() > 0);
        assert!(after.as_micros() >= before.as_micros() + 5_000);
    }
}
