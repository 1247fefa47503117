//! Callback registration shared by the document helpers.
//!
//! Helpers coalesce raw CRDT events into typed callbacks. Registrations
//! hand back an RAII guard; dropping the guard unsubscribes. Callbacks are
//! snapshotted before invocation so a callback can re-enter the helper
//! without deadlocking, and a callback that panics is isolated from the
//! CRDT commit path by the caller never holding locks across it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Slot<C> = (u64, Arc<C>);

/// A set of registered callbacks of one shape.
pub struct Subscriptions<C: ?Sized> {
	slots: Arc<Mutex<Vec<Slot<C>>>>,
	next: AtomicU64,
}

impl<C: ?Sized> Subscriptions<C> {
	pub fn new() -> Self {
		Self { slots: Arc::new(Mutex::new(Vec::new())), next: AtomicU64::new(0) }
	}

	pub fn insert(&self, callback: Arc<C>) -> ObserverGuard<C> {
		let id = self.next.fetch_add(1, Ordering::SeqCst);
		self.slots.lock().push((id, callback));
		ObserverGuard { id, slots: Arc::downgrade(&self.slots) }
	}

	/// Snapshot the registered callbacks for invocation outside any lock.
	pub fn snapshot(&self) -> Vec<Arc<C>> {
		self.slots.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.lock().is_empty()
	}
}

impl<C: ?Sized> Default for Subscriptions<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: ?Sized> std::fmt::Debug for Subscriptions<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscriptions").field("len", &self.slots.lock().len()).finish()
	}
}

/// RAII wrapper around a raw CRDT subscription; dropping it detaches the
/// underlying observer.
pub struct CrdtObserver(pub(crate) yrs::Subscription);

impl std::fmt::Debug for CrdtObserver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CrdtObserver").finish()
	}
}

/// Unsubscribes its callback when dropped.
pub struct ObserverGuard<C: ?Sized> {
	id: u64,
	slots: Weak<Mutex<Vec<Slot<C>>>>,
}

impl<C: ?Sized> Drop for ObserverGuard<C> {
	fn drop(&mut self) {
		if let Some(slots) = self.slots.upgrade() {
			slots.lock().retain(|(id, _)| *id != self.id);
		}
	}
}

impl<C: ?Sized> std::fmt::Debug for ObserverGuard<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObserverGuard").field("id", &self.id).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type Callback = dyn Fn(u32) + Send + Sync;

	#[test]
	fn test_guard_unsubscribes_on_drop() {
		let subs: Subscriptions<Callback> = Subscriptions::new();
		let hits = Arc::new(Mutex::new(0u32));

		let sink = Arc::clone(&hits);
		let guard = subs.insert(Arc::new(move |n| *sink.lock() += n));
		for cb in subs.snapshot() {
			cb(1);
		}
		drop(guard);
		for cb in subs.snapshot() {
			cb(1);
		}
		assert_eq!(*hits.lock(), 1);
		assert!(subs.is_empty());
	}

	#[test]
	fn test_multiple_subscribers() {
		let subs: Subscriptions<Callback> = Subscriptions::new();
		let hits = Arc::new(Mutex::new(0u32));
		let a = Arc::clone(&hits);
		let b = Arc::clone(&hits);
		let _g1 = subs.insert(Arc::new(move |n| *a.lock() += n));
		let _g2 = subs.insert(Arc::new(move |n| *b.lock() += n * 10));
		for cb in subs.snapshot() {
			cb(2);
		}
		assert_eq!(*hits.lock(), 22);
	}
}

// vim: ts=4
