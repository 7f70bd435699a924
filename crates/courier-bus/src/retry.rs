//! # Retry Policy
//!
//! Re-runs an operation that fails with a transient fault.
//!
//! # Features
//!
//! - Configurable maximum retry count (0 = run once)
//! - Immediate, constant, linear, or exponential intervals
//! - Pluggable transient fault classification
//! - Waits abort on cancellation
//!
//! # Example
//!
//! ```ignore
//! use courier_bus::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(5, Duration::from_millis(100), 2.0, Duration::from_secs(5));
//! let value = policy.run(|| client.fetch(), &token).await?;
//! ```

use courier_types::{is_cancellation, BoxError, Cancelled};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Decides whether a failure is worth retrying.
pub trait TransientFaultDetector: Send + Sync {
    fn is_transient(&self, error: &(dyn StdError + Send + Sync + 'static)) -> bool;
}

/// Treats every failure as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyTransient;

impl TransientFaultDetector for AnyTransient {
    fn is_transient(&self, _error: &(dyn StdError + Send + Sync + 'static)) -> bool {
        true
    }
}

/// Classifies failures with a closure.
pub struct FnTransientFaultDetector<F> {
    classify: F,
}

impl<F> FnTransientFaultDetector<F>
where
    F: Fn(&(dyn StdError + Send + Sync + 'static)) -> bool + Send + Sync,
{
    pub fn new(classify: F) -> Self {
        Self { classify }
    }
}

impl<F> TransientFaultDetector for FnTransientFaultDetector<F>
where
    F: Fn(&(dyn StdError + Send + Sync + 'static)) -> bool + Send + Sync,
{
    fn is_transient(&self, error: &(dyn StdError + Send + Sync + 'static)) -> bool {
        (self.classify)(error)
    }
}

/// Wait between consecutive attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryInterval {
    /// Retry without waiting.
    Immediate,
    /// Same wait before every retry.
    Constant(Duration),
    /// `initial + increment * retried`.
    Linear { initial: Duration, increment: Duration },
    /// `initial * multiplier^retried`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl RetryInterval {
    /// Wait before the retry that follows `retried` earlier retries.
    #[must_use]
    pub fn delay_for(&self, retried: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Constant(delay) => delay,
            Self::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(retried))
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let factor = multiplier.max(1.0).powi(retried.min(i32::MAX as u32) as i32);
                // Overflow or a non-finite factor saturates at `max`.
                Duration::try_from_secs_f64(initial.as_secs_f64() * factor)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

/// Retry count, interval and fault classification for one kind of
/// operation. Cheap to clone.
#[derive(Clone)]
pub struct RetryPolicy {
    maximum_retry_count: u32,
    detector: Arc<dyn TransientFaultDetector>,
    interval: RetryInterval,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("maximum_retry_count", &self.maximum_retry_count)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(
        maximum_retry_count: u32,
        detector: Arc<dyn TransientFaultDetector>,
        interval: RetryInterval,
    ) -> Self {
        Self {
            maximum_retry_count,
            detector,
            interval,
        }
    }

    /// Run once, never retry.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Arc::new(AnyTransient), RetryInterval::Immediate)
    }

    #[must_use]
    pub fn immediate(maximum_retry_count: u32) -> Self {
        Self::new(
            maximum_retry_count,
            Arc::new(AnyTransient),
            RetryInterval::Immediate,
        )
    }

    #[must_use]
    pub fn constant(maximum_retry_count: u32, delay: Duration) -> Self {
        Self::new(
            maximum_retry_count,
            Arc::new(AnyTransient),
            RetryInterval::Constant(delay),
        )
    }

    #[must_use]
    pub fn linear(maximum_retry_count: u32, initial: Duration, increment: Duration) -> Self {
        Self::new(
            maximum_retry_count,
            Arc::new(AnyTransient),
            RetryInterval::Linear { initial, increment },
        )
    }

    #[must_use]
    pub fn exponential(
        maximum_retry_count: u32,
        initial: Duration,
        multiplier: f64,
        max: Duration,
    ) -> Self {
        Self::new(
            maximum_retry_count,
            Arc::new(AnyTransient),
            RetryInterval::Exponential {
                initial,
                multiplier,
                max,
            },
        )
    }

    /// Replace the transient fault classifier.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn TransientFaultDetector>) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn maximum_retry_count(&self) -> u32 {
        self.maximum_retry_count
    }

    #[must_use]
    pub fn interval(&self) -> RetryInterval {
        self.interval
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// # Errors
    ///
    /// - The last failure once retries are exhausted.
    /// - A non-transient failure immediately, unchanged.
    /// - [`Cancelled`] if the token fires while waiting between attempts.
    pub async fn run<F, Fut, R>(&self, mut operation: F, token: &CancellationToken) -> Result<R, BoxError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, BoxError>>,
    {
        let mut retried = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if retried >= self.maximum_retry_count
                || is_cancellation(error.as_ref())
                || !self.detector.is_transient(error.as_ref())
            {
                return Err(error);
            }

            let delay = self.interval.delay_for(retried);
            retried += 1;
            debug!(
                retry = retried,
                max_retries = self.maximum_retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );

            if delay.is_zero() {
                if token.is_cancelled() {
                    return Err(Box::new(Cancelled));
                }
            } else {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(Box::new(Cancelled)),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
