use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

type BackoffFn = dyn Fn(usize) -> Duration + Send + Sync;

/// Maps the 0-based index of a failed attempt to the wait before the next one.
///
/// The default is exponential: `500ms * 2^attempt`, clamped to 30 seconds.
#[derive(Clone)]
pub struct Backoff {
    compute: Arc<BackoffFn>,
    label: &'static str,
}

impl Backoff {
    pub fn exponential() -> Self {
        Self::exponential_with(DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }

    pub fn exponential_with(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self::labeled("exponential", move |attempt| {
            exponential_delay(base, max, attempt)
        })
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::labeled("fixed", move |_attempt| delay)
    }

    /// `step * (attempt + 1)`, clamped to `max`.
    pub fn linear(step: Duration, max: Duration) -> Self {
        Self::labeled("linear", move |attempt| {
            let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
            step.checked_mul(factor).unwrap_or(max).min(max)
        })
    }

    pub fn custom<F>(compute: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Self::labeled("custom", compute)
    }

    /// Spreads every computed delay uniformly within `±ratio` of itself.
    pub fn with_jitter(self, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        if ratio <= f64::EPSILON {
            return self;
        }
        let inner = self.compute;
        Self::labeled("jittered", move |attempt| {
            apply_jitter(inner(attempt), ratio)
        })
    }

    pub fn compute(&self, attempt: usize) -> Duration {
        (self.compute)(attempt)
    }

    fn labeled<F>(label: &'static str, compute: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Self {
            compute: Arc::new(compute),
            label,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential()
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Backoff")
            .field("kind", &self.label)
            .finish()
    }
}

fn exponential_delay(base: Duration, max: Duration, attempt: usize) -> Duration {
    let exponent = attempt.min(63) as u32;
    let multiplier = 1_u128 << exponent;
    let base_ns = base.as_nanos();
    let max_ns = max.as_nanos().max(base_ns);
    let delay_ns = base_ns
        .saturating_mul(multiplier)
        .min(max_ns)
        .min(u64::MAX as u128) as u64;
    Duration::from_nanos(delay_ns)
}

fn apply_jitter(delay: Duration, ratio: f64) -> Duration {
    let delay_ns = delay.as_nanos().min(u64::MAX as u128) as u64;
    if delay_ns <= 1 {
        return delay;
    }
    let span = ((delay_ns as f64) * ratio).round().max(1.0) as u64;
    let low = delay_ns.saturating_sub(span);
    let high = delay_ns.saturating_add(span);
    let mut rng = rand::rng();
    Duration::from_nanos(rng.random_range(low..=high))
}
