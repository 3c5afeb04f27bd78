//! Fixed-interval polling with cancellation and an optional deadline.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Configuration for polling behavior.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between two checks.
    pub interval: Duration,
    /// Give up once this much time has passed. `None` waits forever.
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: None,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// How a poll loop ended.
#[derive(Debug, PartialEq)]
pub enum PollOutcome<T> {
    /// The check returned a value accepted by the predicate.
    Ready { value: T, attempts: u32 },
    Cancelled { attempts: u32 },
    DeadlineExceeded { attempts: u32 },
}

/// Run `check` every `config.interval` until `done` accepts its value.
///
/// Check errors end the loop immediately. Cancellation is raced against both
/// the check and the sleep; a check cut short this way still counts as an
/// attempt.
pub async fn poll_until<T, E, F, Fut, P>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut check: F,
    done: P,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled { attempts });
        }

        attempts += 1;
        let value = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled { attempts }),
            value = check() => value?,
        };
        if done(&value) {
            return Ok(PollOutcome::Ready { value, attempts });
        }

        if config
            .deadline
            .is_some_and(|d| started.elapsed() + config.interval > d)
        {
            return Ok(PollOutcome::DeadlineExceeded { attempts });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled { attempts }),
            _ = sleep(config.interval) => {}
        }
    }
}
