//! Monotonic wall clock for last-write-wins timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::Timestamp;

/// Produces strictly increasing timestamps: `next = max(now, last + 1)`.
///
/// Two calls within the same millisecond still yield distinct values, so
/// local writes are totally ordered even under bursts. Clock skew on a
/// misconfigured device can make its writes win unfairly against peers;
/// that is inherent to wall-clock LWW and documented at the store level.
#[derive(Debug, Default)]
pub struct MonotonicClock {
	last: AtomicI64,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self { last: AtomicI64::new(0) }
	}

	pub fn next(&self) -> Timestamp {
		let now = Timestamp::now().0;
		let prev = self
			.last
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
			.unwrap_or(0);
		Timestamp(now.max(prev + 1))
	}

	/// Fold an observed remote timestamp into the clock so subsequent local
	/// writes order after it.
	pub fn observe(&self, ts: Timestamp) {
		self.last.fetch_max(ts.0, Ordering::SeqCst);
	}
}


// vim: ts=4
