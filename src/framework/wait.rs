//! # Polling State Machine
//!
//! Long-running operations (gateway create/update/delete, application
//! authorization, signature binding) converge by repeatedly refreshing an
//! object and classifying its state as pending or target. All four pollers
//! share this loop so that timeout and cancellation behave the same way.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{ApigwError, ApigwResult};

/// Outcome of one refresh: the object (if it still exists) and its state label
#[derive(Debug, Clone)]
pub struct Refresh<T> {
    pub value: Option<T>,
    pub state: String,
}

impl<T> Refresh<T> {
    pub fn found<S: Into<String>>(value: T, state: S) -> Self {
        Self {
            value: Some(value),
            state: state.into(),
        }
    }

    pub fn gone() -> Self {
        Self {
            value: None,
            state: String::new(),
        }
    }
}

/// Poll `refresh` until it reports one of the `target` states
pub struct StateChangeConf<F> {
    operation: String,
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    delay: Duration,
    min_interval: Duration,
    not_found_checks: u32,
    refresh: F,
}

impl<F, Fut, T> StateChangeConf<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApigwResult<Refresh<T>>>,
{
    pub fn new<S: Into<String>>(operation: S, refresh: F) -> Self {
        Self {
            operation: operation.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(180),
            delay: Duration::ZERO,
            min_interval: Duration::from_secs(2),
            not_found_checks: 20,
            refresh,
        }
    }

    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait before the first refresh
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Minimum time between two refreshes
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Consecutive "gone" refreshes tolerated before giving up
    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Run the loop until a target state, an error, the timeout or cancellation
    pub async fn wait_for_state(mut self, cancel: &CancellationToken) -> ApigwResult<T> {
        let deadline = Instant::now() + self.timeout;
        let mut not_found = 0u32;

        self.pause(self.delay, deadline, cancel).await?;

        loop {
            let refreshed = tokio::select! {
                result = timeout_at(deadline, (self.refresh)()) => match result {
                    Ok(refreshed) => refreshed?,
                    Err(_) => return Err(self.timed_out()),
                },
                _ = cancel.cancelled() => return Err(ApigwError::cancelled(&self.operation)),
            };

            match refreshed.value {
                None => {
                    not_found += 1;
                    if not_found > self.not_found_checks {
                        return Err(ApigwError::not_found(&self.operation, "polled object"));
                    }
                }
                Some(value) => {
                    not_found = 0;
                    if self.target.iter().any(|state| *state == refreshed.state) {
                        debug!(operation = %self.operation, state = %refreshed.state, "Target state reached");
                        return Ok(value);
                    }
                    if !self.pending.iter().any(|state| *state == refreshed.state) {
                        warn!(operation = %self.operation, state = %refreshed.state, "Unexpected state");
                        return Err(ApigwError::UnexpectedState {
                            operation: self.operation.clone(),
                            state: refreshed.state,
                        });
                    }
                    debug!(operation = %self.operation, state = %refreshed.state, "Still pending");
                }
            }

            if Instant::now() >= deadline {
                return Err(self.timed_out());
            }
            self.pause(self.min_interval, deadline, cancel).await?;
        }
    }

    async fn pause(
        &self,
        wait: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ApigwResult<()> {
        if wait.is_zero() {
            return Ok(());
        }
        let until = std::cmp::min(Instant::now() + wait, deadline);
        tokio::select! {
            _ = sleep(until.saturating_duration_since(Instant::now())) => Ok(()),
            _ = cancel.cancelled() => Err(ApigwError::cancelled(&self.operation)),
        }
    }

    fn timed_out(&self) -> ApigwError {
        ApigwError::PollerTimeout {
            operation: self.operation.clone(),
            timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_reaches_target_after_pending() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let conf = StateChangeConf::new("test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let state = if n < 2 { "PENDING" } else { "DONE" };
            Ok(Refresh::found(n, state))
        })
        .pending(["PENDING"])
        .target(["DONE"])
        .min_interval(Duration::from_millis(1));

        let value = conf.wait_for_state(&CancellationToken::new()).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_unexpected_state_is_fatal() {
        let conf = StateChangeConf::new("test", || async { Ok(Refresh::found((), "failed")) })
            .pending(["creating"])
            .target(["success"]);

        let err = conf.wait_for_state(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ApigwError::UnexpectedState { ref state, .. } if state == "failed"));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let conf = StateChangeConf::new("test", || async { Ok(Refresh::found((), "PENDING")) })
            .pending(["PENDING"])
            .target(["DONE"])
            .timeout(Duration::from_millis(20))
            .min_interval(Duration::from_millis(5));

        let err = conf.wait_for_state(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ApigwError::PollerTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation_stops_waiting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let conf = StateChangeConf::new("test", || async { Ok(Refresh::found((), "PENDING")) })
            .pending(["PENDING"])
            .target(["DONE"])
            .delay(Duration::from_secs(60));

        let err = conf.wait_for_state(&cancel).await.unwrap_err();
        assert!(matches!(err, ApigwError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_gone_object_exhausts_not_found_checks() {
        let conf = StateChangeConf::new("test", || async { Ok(Refresh::<()>::gone()) })
            .pending(["PENDING"])
            .target(["DONE"])
            .not_found_checks(2)
            .min_interval(Duration::from_millis(1));

        let err = conf.wait_for_state(&CancellationToken::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
