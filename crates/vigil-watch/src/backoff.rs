//! Reconnect delay policies.
//!
//! Two policies cover the two failure classes the supervisor distinguishes:
//! capped, jittered exponential backoff for transient faults, and a single
//! fixed long cooldown for authentication rejections (retrying quickly after
//! an auth rejection is presumed futile and abusive to the upstream).

use std::time::Duration;

/// Jitter band applied multiplicatively around the clamped delay.
///
/// The band is applied after the ceiling clamp, so the ceiling can be
/// exceeded by at most 25%. This keeps independent watchers of the same
/// upstream from piling onto a hard synchronization wall.
const JITTER_LOW: f64 = 0.75;
const JITTER_HIGH: f64 = 1.25;

/// Exponential backoff policy for transient connection failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay for attempt 0.
    pub base: Duration,

    /// Growth stops doubling past this attempt.
    pub cap_exponent: u32,

    /// Ceiling for the unjittered delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap_exponent: 6,
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Unjittered delay for an attempt:
    /// `base * 2^min(attempt, cap_exponent)`, clamped to `max`.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(self.cap_exponent);
        let delay = self.base.saturating_mul(1u32 << exp.min(31));
        delay.min(self.max)
    }

    /// Delay with jitter applied.
    ///
    /// `jitter_unit` in `[0, 1]` maps linearly onto the `[0.75, 1.25]`
    /// multiplier band. Pure and deterministic given the unit, so delay
    /// schedules are fully testable.
    pub fn delay(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let factor = JITTER_LOW + (JITTER_HIGH - JITTER_LOW) * jitter_unit.clamp(0.0, 1.0);
        self.raw_delay(attempt).mul_f64(factor)
    }
}

/// Source of jitter units in `[0, 1]`.
///
/// Injectable so the supervisor's delay schedule is deterministic in tests.
pub trait JitterSource: Send {
    /// Next jitter unit.
    fn unit(&mut self) -> f64;
}

/// Default jitter source backed by the thread RNG.
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn unit(&mut self) -> f64 {
        use rand::Rng;
        rand::rng().random::<f64>()
    }
}

/// Fixed jitter unit, for tests and for disabling jitter (`FixedJitter(0.5)`
/// yields exactly the unjittered delay).
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn unit(&mut self) -> f64 {
        self.0
    }
}
