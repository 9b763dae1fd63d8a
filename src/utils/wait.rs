use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cooperative stop flag shared between the host and the worker thread.
///
/// Every blocking wait in the engine goes through [`StopSignal::wait_timeout`],
/// so raising the signal wakes the worker immediately.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        self.cv.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `timeout` unless the signal is raised first.
    /// Returns `true` when the wait ended because of the signal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            raised = guard;
        }
        true
    }

    /// Poll `check` every `interval` until it yields a value, `timeout`
    /// elapses, or the signal is raised.
    pub fn poll_until<T>(
        &self,
        timeout: Duration,
        interval: Duration,
        mut check: impl FnMut() -> Option<T>,
    ) -> Poll<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_raised() {
                return Poll::Stopped;
            }
            if let Some(v) = check() {
                return Poll::Ready(v);
            }
            let now = Instant::now();
            if now >= deadline {
                return Poll::TimedOut;
            }
            if self.wait_timeout(interval.min(deadline - now)) {
                return Poll::Stopped;
            }
        }
    }
}

/// Outcome of [`StopSignal::poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    TimedOut,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_false_on_timeout() {
        let s = StopSignal::new();
        assert!(!s.wait_timeout(Duration::from_millis(5)));
        assert!(!s.is_raised());
    }

    #[test]
    fn raise_wakes_a_long_wait() {
        let s = Arc::new(StopSignal::new());
        let s2 = Arc::clone(&s);
        let started = Instant::now();
        let h = thread::spawn(move || s2.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        s.raise();
        assert!(h.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn poll_until_reports_each_outcome() {
        let s = StopSignal::new();
        let mut n = 0;
        let got = s.poll_until(Duration::from_secs(1), Duration::from_millis(1), || {
            n += 1;
            (n == 3).then_some(n)
        });
        assert_eq!(got, Poll::Ready(3));

        let none: Poll<()> =
            s.poll_until(Duration::from_millis(5), Duration::from_millis(1), || None);
        assert_eq!(none, Poll::TimedOut);

        s.raise();
        let stopped: Poll<()> =
            s.poll_until(Duration::from_secs(1), Duration::from_millis(1), || None);
        assert_eq!(stopped, Poll::Stopped);
    }
}
