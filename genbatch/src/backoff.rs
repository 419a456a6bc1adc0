//! Retry backoff used when a failed attempt returns a task to pending.
//!
//! Three strategies are provided:
//!
//! 1. Constant
//! 2. Linear
//! 3. Exponential
//!
//! each of which can be clamped with a maximum and modified by applying a [`Jitter`].
//!
//! Jobs carry a serializable [`RetryBackoff`] as part of their [`crate::job::JobConfig`]. The
//! default is [`RetryBackoff::None`], in which case a failed task is claimable again by the very
//! next batch.
//!
//! # Example
//!
//! ```
//! # use genbatch::prelude::*;
//! # use chrono::TimeDelta;
//! let strategy = BackoffStrategy::linear(TimeDelta::seconds(20))
//!     .with_max(TimeDelta::seconds(60))
//!     .with_jitter(Jitter::Absolute(TimeDelta::seconds(10)));
//!
//! assert!(strategy.backoff(1) >= TimeDelta::seconds(10));
//! assert!(strategy.backoff(1) <= TimeDelta::seconds(30));
//! // Note the max here is the max plus max jitter
//! assert!(strategy.backoff(10) <= TimeDelta::seconds(70));
//! ```
use chrono::TimeDelta;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Type that can be used to implement a backoff strategy.
pub trait Strategy {
    /// Given the number of attempts made so far returns the [`TimeDelta`] to wait before the task
    /// may be claimed again.
    fn backoff(&self, attempt: u32) -> TimeDelta;
}

/// Always returns the same delay no matter what the attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    delay: TimeDelta,
}

impl Strategy for Constant {
    fn backoff(&self, _attempt: u32) -> TimeDelta {
        self.delay
    }
}

/// Grows linearly with each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linear {
    factor: TimeDelta,
    max: Option<TimeDelta>,
}

impl Strategy for Linear {
    fn backoff(&self, attempt: u32) -> TimeDelta {
        let factor = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut backoff = self.factor.checked_mul(factor).unwrap_or(TimeDelta::MAX);
        if let Some(max) = self.max {
            backoff = backoff.min(max);
        }
        backoff
    }
}

/// Doubles with each attempt, starting at `base` for the first attempt.
///
/// It is advisable to set the maximum using [`BackoffStrategy::with_max`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    base: TimeDelta,
    max: Option<TimeDelta>,
}

impl Strategy for Exponential {
    fn backoff(&self, attempt: u32) -> TimeDelta {
        let mut milliseconds = 2_i64
            .checked_pow(attempt.saturating_sub(1))
            .and_then(|factor| self.base.num_milliseconds().checked_mul(factor))
            .unwrap_or(i64::MAX);
        if let Some(max) = self.max {
            milliseconds = milliseconds.min(max.num_milliseconds());
        }
        TimeDelta::try_milliseconds(milliseconds).unwrap_or(TimeDelta::MAX)
    }
}

/// A random jitter to be applied to a given backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// A random jitter in the range `-delta =< jitter =< delta`.
    Absolute(TimeDelta),
    /// A random jitter as a proportion of the current backoff.
    Relative(f64),
}

impl Jitter {
    fn apply_jitter(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        }
        .abs();
        let jitter = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value
            .checked_add(&TimeDelta::milliseconds(jitter))
            .unwrap_or(value)
    }
}

/// A backoff [`Strategy`] with an optional [`Jitter`] and minimum.
///
/// All of the constructors and configuration functions are `const`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffStrategy<T: Strategy> {
    strategy: T,
    jitter: Option<Jitter>,
    min: TimeDelta,
}

impl BackoffStrategy<Constant> {
    /// ```
    /// # use genbatch::prelude::*;
    /// # use chrono::TimeDelta;
    /// let strategy = BackoffStrategy::constant(TimeDelta::seconds(10));
    ///
    /// assert_eq!(strategy.backoff(1), TimeDelta::seconds(10));
    /// assert_eq!(strategy.backoff(3), TimeDelta::seconds(10));
    /// ```
    pub const fn constant(delay: TimeDelta) -> Self {
        Self::new(Constant { delay })
    }
}

impl BackoffStrategy<Linear> {
    /// ```
    /// # use genbatch::prelude::*;
    /// # use chrono::TimeDelta;
    /// let strategy = BackoffStrategy::linear(TimeDelta::seconds(10)).with_max(TimeDelta::seconds(25));
    ///
    /// assert_eq!(strategy.backoff(1), TimeDelta::seconds(10));
    /// assert_eq!(strategy.backoff(2), TimeDelta::seconds(20));
    /// assert_eq!(strategy.backoff(3), TimeDelta::seconds(25));
    /// ```
    pub const fn linear(factor: TimeDelta) -> Self {
        Self::new(Linear { factor, max: None })
    }

    /// Clamps the maximum value to be returned by [`Strategy::backoff`] to `max_delay`.
    pub const fn with_max(mut self, max_delay: TimeDelta) -> Self {
        self.strategy.max = Some(max_delay);
        self
    }
}

impl BackoffStrategy<Exponential> {
    /// ```
    /// # use genbatch::prelude::*;
    /// # use chrono::TimeDelta;
    /// let strategy =
    ///     BackoffStrategy::exponential(TimeDelta::seconds(2)).with_max(TimeDelta::seconds(30));
    ///
    /// assert_eq!(strategy.backoff(1), TimeDelta::seconds(2));
    /// assert_eq!(strategy.backoff(2), TimeDelta::seconds(4));
    /// assert_eq!(strategy.backoff(3), TimeDelta::seconds(8));
    /// assert_eq!(strategy.backoff(5), TimeDelta::seconds(30));
    /// ```
    pub const fn exponential(base: TimeDelta) -> Self {
        Self::new(Exponential { base, max: None })
    }

    /// Clamps the maximum value to be returned by [`Strategy::backoff`] to `max_delay`.
    pub const fn with_max(mut self, max_delay: TimeDelta) -> Self {
        self.strategy.max = Some(max_delay);
        self
    }
}

impl<T> BackoffStrategy<T>
where
    T: Strategy,
{
    pub const fn new(strategy: T) -> Self {
        Self {
            strategy,
            jitter: None,
            min: TimeDelta::zero(),
        }
    }

    pub const fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Add a minimum value, useful to avoid a large jitter producing a tiny (or negative) delay.
    pub const fn with_min(mut self, min: TimeDelta) -> Self {
        self.min = min;
        self
    }
}

impl<T> Strategy for BackoffStrategy<T>
where
    T: Strategy,
{
    fn backoff(&self, attempt: u32) -> TimeDelta {
        let mut backoff = self.strategy.backoff(attempt);

        if let Some(jitter) = self.jitter {
            backoff = jitter.apply_jitter(backoff);
        }

        backoff.max(self.min)
    }
}

/// The serializable retry backoff stored in a job's config.
///
/// Every strategy but [`RetryBackoff::None`] takes an optional `jitter_percent`, a relative
/// [`Jitter`] of up to that percentage of the delay, so that tasks failing together do not all
/// become claimable at the same instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum RetryBackoff {
    #[default]
    None,
    Constant {
        delay_ms: u64,
        #[serde(default)]
        jitter_percent: Option<u8>,
    },
    Linear {
        delay_ms: u64,
        max_ms: Option<u64>,
        #[serde(default)]
        jitter_percent: Option<u8>,
    },
    Exponential {
        base_ms: u64,
        max_ms: Option<u64>,
        #[serde(default)]
        jitter_percent: Option<u8>,
    },
}

/// Jitter percentages above this would allow a negative delay.
pub const MAX_JITTER_PERCENT: u8 = 100;

impl RetryBackoff {
    pub const fn jitter_percent(&self) -> Option<u8> {
        match *self {
            Self::None => None,
            Self::Constant { jitter_percent, .. }
            | Self::Linear { jitter_percent, .. }
            | Self::Exponential { jitter_percent, .. } => jitter_percent,
        }
    }

    fn jittered<T: Strategy>(&self, strategy: BackoffStrategy<T>) -> BackoffStrategy<T> {
        match self.jitter_percent() {
            Some(percent) if percent > 0 => {
                strategy.with_jitter(Jitter::Relative(f64::from(percent) / 100.0))
            }
            _ => strategy,
        }
    }
}

fn millis(value: u64) -> TimeDelta {
    TimeDelta::try_milliseconds(i64::try_from(value).unwrap_or(i64::MAX)).unwrap_or(TimeDelta::MAX)
}

impl Strategy for RetryBackoff {
    fn backoff(&self, attempt: u32) -> TimeDelta {
        match *self {
            Self::None => TimeDelta::zero(),
            Self::Constant { delay_ms, .. } => self
                .jittered(BackoffStrategy::constant(millis(delay_ms)))
                .backoff(attempt),
            Self::Linear {
                delay_ms, max_ms, ..
            } => {
                let strategy = BackoffStrategy::linear(millis(delay_ms));
                match max_ms {
                    Some(max_ms) => self.jittered(strategy.with_max(millis(max_ms))),
                    None => self.jittered(strategy),
                }
                .backoff(attempt)
            }
            Self::Exponential {
                base_ms, max_ms, ..
            } => {
                let strategy = BackoffStrategy::exponential(millis(base_ms));
                match max_ms {
                    Some(max_ms) => self.jittered(strategy.with_max(millis(max_ms))),
                    None => self.jittered(strategy),
                }
                .backoff(attempt)
            }
        }
    }
}
