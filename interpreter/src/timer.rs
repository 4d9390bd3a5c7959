use std::time::Duration;

use crate::clock::SharedClock;

/// Stopwatch over an injected clock.
pub struct Timer {
    clock: SharedClock,
    started_at: Duration,
}

impl Timer {
    pub fn new(clock: SharedClock) -> Self {
        let started_at = clock.now();
        Timer { clock, started_at }
    }

    pub fn start(&mut self) {
        self.started_at = self.clock.now();
    }

    pub fn time_elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn measures_from_last_start() {
        let clock = Rc::new(ManualClock::new());
        let mut timer = Timer::new(clock.clone());
        clock.advance(Duration::from_millis(30));
        assert_eq!(timer.time_elapsed(), Duration::from_millis(30));

        timer.start();
        clock.advance(Duration::from_millis(5));
        assert_eq!(timer.time_elapsed(), Duration::from_millis(5));
    }
}
