use std::fmt;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<usize>,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts: None,
            cancellation: None,
        }
    }

    pub(crate) fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    Retry,
    Abort,
}

/// Why `retry_with_backoff` gave up.
#[derive(Debug)]
pub(crate) enum RetryFailure {
    Cancelled,
    Aborted {
        attempts: usize,
        error: anyhow::Error,
    },
    Exhausted {
        attempts: usize,
        error: anyhow::Error,
    },
}

impl fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryFailure::Cancelled => write!(f, "retry cancelled"),
            RetryFailure::Aborted { attempts, error } => {
                write!(f, "aborted after {attempts} attempt(s): {error:#}")
            }
            RetryFailure::Exhausted { attempts, error } => {
                write!(f, "gave up after {attempts} attempt(s): {error:#}")
            }
        }
    }
}

/// Delays between attempts: `initial`, doubling up to `max`.
#[derive(Debug, Clone, Copy)]
struct DelaySchedule {
    next: Duration,
    max: Duration,
}

impl DelaySchedule {
    fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }
}

impl Iterator for DelaySchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = if current.is_zero() {
            self.max.min(Duration::from_millis(1))
        } else {
            current.saturating_mul(2).min(self.max)
        };
        Some(current)
    }
}

/// Runs `operation` until it succeeds, `classify_error` aborts, the attempt
/// ceiling is hit, or the token is cancelled.
///
/// `on_retry(attempt, delay, error, will_retry)` runs after every retryable
/// failure, including the last one.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryFailure>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error, bool),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let is_cancelled = || config.cancellation.is_some_and(CancellationToken::is_cancelled);
    let mut delays = DelaySchedule::new(config.initial_delay, config.max_delay);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let delay = delays.next().unwrap_or(config.max_delay);
        if is_cancelled() {
            return Err(RetryFailure::Cancelled);
        }

        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if let RetryDisposition::Abort = classify_error(attempt, &error) {
            return Err(RetryFailure::Aborted {
                attempts: attempt,
                error,
            });
        }

        let exhausted = config.max_attempts.is_some_and(|max| attempt >= max);
        on_retry(attempt, delay, &error, !exhausted);
        if exhausted {
            return Err(RetryFailure::Exhausted {
                attempts: attempt,
                error,
            });
        }
        if !pause(delay, config.cancellation).await {
            return Err(RetryFailure::Cancelled);
        }
    }
}

/// Returns `false` when the pause was cut short by cancellation.
async fn pause(delay: Duration, cancellation: Option<&CancellationToken>) -> bool {
    match cancellation {
        _ if delay.is_zero() => {
            yield_now().await;
            true
        }
        Some(token) => tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        },
        None => {
            sleep(delay).await;
            true
        }
    }
}
