use std::thread;
use std::time::Duration;

pub trait Clock {
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub enum PollStep<T> {
    Ready(T),
    Pending,
    Stop,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Exhausted,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::every_second()
    }
}

impl RetryPolicy {
    pub const fn every_second() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Calls `attempt` (with a 1-based attempt number) until it is ready,
    /// asks to stop, or the attempt budget runs out. Sleeps `interval` on
    /// `clock` between pending attempts only.
    pub fn poll<C, T, F>(&self, clock: &C, mut attempt: F) -> PollOutcome<T>
    where
        C: Clock + ?Sized,
        F: FnMut(u32) -> PollStep<T>,
    {
        let mut n: u32 = 0;
        loop {
            n = n.saturating_add(1);
            match attempt(n) {
                PollStep::Ready(value) => return PollOutcome::Ready(value),
                PollStep::Stop => return PollOutcome::Stopped,
                PollStep::Pending => {}
            }
            if self.max_attempts.is_some_and(|max| n >= max) {
                return PollOutcome::Exhausted;
            }
            clock.sleep(self.interval);
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use std::cell::RefCell;
    use std::time::Duration;

    #[derive(Default)]
    pub struct TestClock {
        sleeps: RefCell<Vec<Duration>>,
    }

    impl TestClock {
        pub fn sleeps(&self) -> usize {
            self.sleeps.borrow().len()
        }

        pub fn total(&self) -> Duration {
            self.sleeps.borrow().iter().sum()
        }
    }

    impl Clock for TestClock {
        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestClock;
    use super::*;

    #[test]
    fn poll_sleeps_between_pending_attempts_only() {
        let clock = TestClock::default();
        let outcome = RetryPolicy::every_second().poll(&clock, |n| {
            if n == 4 {
                PollStep::Ready(n)
            } else {
                PollStep::Pending
            }
        });
        assert_eq!(outcome, PollOutcome::Ready(4));
        assert_eq!(clock.sleeps(), 3);
        assert_eq!(clock.total(), Duration::from_secs(3));
    }

    #[test]
    fn poll_respects_max_attempts() {
        let clock = TestClock::default();
        let outcome: PollOutcome<()> = RetryPolicy::every_second()
            .with_max_attempts(2)
            .poll(&clock, |_| PollStep::Pending);
        assert_eq!(outcome, PollOutcome::Exhausted);
        assert_eq!(clock.sleeps(), 1);
    }

    #[test]
    fn poll_stop_returns_without_sleeping() {
        let clock = TestClock::default();
        let outcome: PollOutcome<()> = RetryPolicy::every_second().poll(&clock, |_| PollStep::Stop);
        assert_eq!(outcome, PollOutcome::Stopped);
        assert_eq!(clock.sleeps(), 0);
    }
}
