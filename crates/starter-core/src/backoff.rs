//! Delay between respawn attempts.
//!
//! The policy is handed to the supervisor as a callback and invoked once per
//! failed attempt with the previous delay. It never imposes a floor: a zero
//! delay stays zero under the exponential policy, the supervisor's initial
//! delay is what seeds the sequence.

use std::sync::Arc;
use std::time::Duration;

use starter_supervise::DelayFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
	/// Every retry waits the same amount.
	Fixed(Duration),
	/// Every retry waits twice as long as the previous one.
	Exponential,
}

impl BackoffPolicy {
	/// A positive minimum wait selects the fixed policy.
	pub fn from_min_wait(min_wait: Duration) -> Self {
		if min_wait > Duration::ZERO {
			BackoffPolicy::Fixed(min_wait)
		} else {
			BackoffPolicy::Exponential
		}
	}

	pub fn next_delay(&self, current: Duration) -> Duration {
		match self {
			BackoffPolicy::Fixed(wait) => *wait,
			BackoffPolicy::Exponential => current.saturating_mul(2),
		}
	}

	pub fn into_delay_fn(self) -> DelayFn {
		Arc::new(move |current: Duration| self.next_delay(current))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_wait_ignores_previous_delay() {
		let policy = BackoffPolicy::from_min_wait(Duration::from_secs(3));
		assert_eq!(policy, BackoffPolicy::Fixed(Duration::from_secs(3)));
		for previous in [0, 1, 3, 10, 3600] {
			assert_eq!(policy.next_delay(Duration::from_secs(previous)), Duration::from_secs(3));
		}
	}

	#[test]
	fn exponential_doubles_each_step() {
		let policy = BackoffPolicy::from_min_wait(Duration::ZERO);
		let mut delay = Duration::from_millis(250);
		for _ in 0..8 {
			let next = policy.next_delay(delay);
			assert_eq!(next, delay * 2);
			delay = next;
		}
		assert_eq!(delay, Duration::from_millis(250 * 256));
	}

	#[test]
	fn zero_stays_zero_without_min_wait() {
		let policy = BackoffPolicy::Exponential;
		assert_eq!(policy.next_delay(Duration::ZERO), Duration::ZERO);
	}

	#[test]
	fn doubling_saturates() {
		assert_eq!(BackoffPolicy::Exponential.next_delay(Duration::MAX), Duration::MAX);
	}

	#[test]
	fn callback_matches_policy() {
		let f = BackoffPolicy::Fixed(Duration::from_secs(2)).into_delay_fn();
		assert_eq!(f(Duration::from_secs(100)), Duration::from_secs(2));
		let f = BackoffPolicy::Exponential.into_delay_fn();
		assert_eq!(f(Duration::from_secs(1)), Duration::from_secs(2));
	}
}
