use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Outcome of one observation inside a poll loop.
pub enum Progress<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not there yet; the reason is carried into the timeout error so a
    /// "condition not met" failure says what was last observed.
    Pending(String),
}

impl<T> Progress<T> {
    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }

    /// Downgrade an observation error to one more pending round.
    ///
    /// Errors inside a poll are fatal by default; wrap the observation with
    /// this where transient CLI/API flakiness is expected (bounded
    /// submission retry), so the swallowing is explicit at the call site.
    pub fn retry_on_error(result: Result<Self>) -> Result<Self> {
        match result {
            Err(error) => Ok(Self::Pending(format!("retrying after error: {error:#}"))),
            ok => ok,
        }
    }
}

/// Shared flag that aborts in-flight polls, e.g. when the overall run
/// budget expires.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub enum PollError {
    TimedOut {
        what: String,
        timeout: Duration,
        last_pending: Option<String>,
    },
    Cancelled {
        what: String,
    },
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut {
                what,
                timeout,
                last_pending,
            } => {
                write!(f, "timed out after {timeout:?} waiting for {what}")?;
                if let Some(reason) = last_pending {
                    write!(f, " (last: {reason})")?;
                }
                Ok(())
            }
            Self::Cancelled { what } => write!(f, "cancelled while waiting for {what}"),
        }
    }
}

impl std::error::Error for PollError {}

/// Fixed-interval, bounded-deadline convergence checker.
///
/// The observation runs immediately, then once per interval until it
/// returns [`Progress::Ready`], the deadline passes (one final attempt is
/// made at the deadline), the token is cancelled, or the observation
/// returns an error. Errors are fatal, not silently retried.
#[derive(Clone)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    cancel: Option<CancelToken>,
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: None,
        }
    }

    pub fn secs(interval: u64, timeout: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn poll<T>(&self, what: &str, mut observe: impl FnMut() -> Result<Progress<T>>) -> Result<T> {
        let start = Instant::now();
        let mut last_pending = None;

        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    return Err(PollError::Cancelled { what: what.into() }.into());
                }
            }

            match observe()? {
                Progress::Ready(value) => return Ok(value),
                Progress::Pending(reason) => {
                    trace!("waiting for {what}: {reason}");
                    last_pending = Some(reason);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(PollError::TimedOut {
                    what: what.into(),
                    timeout: self.timeout,
                    last_pending,
                }
                .into());
            }

            // Never sleep past the deadline; the attempt after this sleep
            // is the final one.
            self.sleep_cancellable(self.interval.min(self.timeout - elapsed));
        }
    }

    fn sleep_cancellable(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(100);
        let until = Instant::now() + duration;
        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    return;
                }
            }
            let now = Instant::now();
            if now >= until {
                return;
            }
            thread::sleep((until - now).min(SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    fn fast_poller(timeout_ms: u64) -> Poller {
        Poller::new(Duration::from_millis(10), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn succeeds_after_k_intervals() {
        let mut attempts = 0;
        let start = Instant::now();
        let result: Result<u32> = fast_poller(500).poll("counter", || {
            attempts += 1;
            if attempts == 4 {
                Ok(Progress::Ready(attempts))
            } else {
                Ok(Progress::pending("not yet"))
            }
        });
        assert_eq!(result.unwrap(), 4);
        let elapsed = start.elapsed();
        // three intervals of waiting, with one interval of slack
        assert!(elapsed >= Duration::from_millis(25), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(100), "returned late: {elapsed:?}");
    }

    #[test]
    fn times_out_at_or_after_deadline() {
        let start = Instant::now();
        let result: Result<()> = fast_poller(55).poll("never", || Ok(Progress::pending("still no")));
        let elapsed = start.elapsed();
        let error = result.unwrap_err();
        let poll_error = error.downcast_ref::<PollError>().expect("poll error");
        assert!(matches!(poll_error, PollError::TimedOut { .. }));
        assert!(error.to_string().contains("still no"));
        assert!(elapsed >= Duration::from_millis(55), "gave up early: {elapsed:?}");
    }

    #[test]
    fn observation_error_is_fatal() {
        let mut attempts = 0;
        let result: Result<()> = fast_poller(5_000).poll("broken", || {
            attempts += 1;
            bail!("oc: unknown flag")
        });
        let error = result.unwrap_err();
        assert!(error.downcast_ref::<PollError>().is_none());
        assert_eq!(attempts, 1, "a broken observation must not be retried");
    }

    #[test]
    fn retry_on_error_downgrades_to_pending() {
        let mut attempts = 0;
        let result: Result<u32> = fast_poller(500).poll("flaky", || {
            attempts += 1;
            Progress::retry_on_error(if attempts < 3 {
                Err(anyhow::anyhow!("transient apply failure"))
            } else {
                Ok(Progress::Ready(attempts))
            })
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn cancellation_aborts_promptly() {
        let token = CancelToken::new();
        let poller = Poller::new(Duration::from_millis(50), Duration::from_secs(60))
            .with_cancel(token.clone());

        let handle = thread::spawn({
            let token = token.clone();
            move || {
                thread::sleep(Duration::from_millis(30));
                token.cancel();
            }
        });

        let start = Instant::now();
        let result: Result<()> = poller.poll("cancelled", || Ok(Progress::pending("waiting")));
        handle.join().unwrap();

        let error = result.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<PollError>(),
            Some(PollError::Cancelled { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
