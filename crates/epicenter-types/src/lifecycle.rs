//! Lifecycle contract for providers and documents.
//!
//! Every provider attached to a document exposes two things: a readiness
//! signal (`when_synced`) that resolves at most once per document lifetime,
//! and an idempotent `destroy`. Documents aggregate readiness with AND
//! semantics and destruction with settle-all semantics: one failing provider
//! never blocks the teardown of the others.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::prelude::*;

/// Pluggable module attached to a document (persistence, sync, side
/// effects).
///
/// Implementations must tolerate `destroy` being called before
/// `when_synced` resolves, and must deliver remote document mutations under
/// their own transaction origin so observers can distinguish echoes.
#[async_trait]
pub trait Provider: Debug + Send + Sync {
	/// Short name used in logs and as the transaction origin tag.
	fn name(&self) -> &str;

	/// Resolves when the provider has completed its initial side effects
	/// (loaded state, established initial peer sync). Resolves or rejects
	/// at most once; later calls observe the settled state.
	async fn when_synced(&self) -> EpiResult<()>;

	/// Releases all resources. Idempotent; must return quickly and must not
	/// block on pending I/O beyond a best-effort final flush.
	async fn destroy(&self) -> EpiResult<()>;
}

#[derive(Clone, Debug)]
enum ReadyState {
	Pending,
	Ready,
	Failed(Arc<str>),
}

/// Single-resolution readiness signal.
///
/// The signal settles exactly once: the first `resolve` or `fail` wins and
/// every later transition is ignored. Waiters that subscribe after the
/// signal settled observe the settled state immediately.
#[derive(Debug)]
pub struct Readiness {
	tx: watch::Sender<ReadyState>,
}

impl Readiness {
	pub fn new() -> Self {
		let (tx, _rx) = watch::channel(ReadyState::Pending);
		Self { tx }
	}

	/// Mark the initial side effects as complete.
	pub fn resolve(&self) {
		self.tx.send_if_modified(|state| {
			if matches!(state, ReadyState::Pending) {
				*state = ReadyState::Ready;
				true
			} else {
				false
			}
		});
	}

	/// Mark initialization as failed. Waiters observe a `ProviderInit`
	/// error.
	pub fn fail(&self, message: impl Into<String>) {
		let message: Arc<str> = message.into().into();
		self.tx.send_if_modified(|state| {
			if matches!(state, ReadyState::Pending) {
				*state = ReadyState::Failed(message);
				true
			} else {
				false
			}
		});
	}

	/// Wait until the signal settles.
	pub async fn wait(&self) -> EpiResult<()> {
		let mut rx = self.tx.subscribe();
		loop {
			let state = rx.borrow_and_update().clone();
			match state {
				ReadyState::Ready => return Ok(()),
				ReadyState::Failed(msg) => return Err(Error::ProviderInit(msg.to_string())),
				ReadyState::Pending => {
					if rx.changed().await.is_err() {
						return Err(Error::Lifecycle(
							"destroyed before initial sync completed".into(),
						));
					}
				}
			}
		}
	}
}

impl Default for Readiness {
	fn default() -> Self {
		Self::new()
	}
}

/// One-shot destruction latch. `begin()` returns true exactly once.
#[derive(Debug, Default)]
pub struct DestroyOnce(AtomicBool);

impl DestroyOnce {
	pub fn begin(&self) -> bool {
		!self.0.swap(true, Ordering::SeqCst)
	}

	pub fn is_destroyed(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Lifecycle normalization: a provider with no side effects. Already
/// synced, destroy is a no-op. Used where an extension returns nothing.
#[derive(Debug)]
pub struct NoopProvider {
	name: Box<str>,
	readiness: Readiness,
}

impl NoopProvider {
	pub fn new(name: impl Into<Box<str>>) -> Self {
		let readiness = Readiness::new();
		readiness.resolve();
		Self { name: name.into(), readiness }
	}
}

#[async_trait]
impl Provider for NoopProvider {
	fn name(&self) -> &str {
		&self.name
	}

	async fn when_synced(&self) -> EpiResult<()> {
		self.readiness.wait().await
	}

	async fn destroy(&self) -> EpiResult<()> {
		Ok(())
	}
}

/// AND aggregation over provider readiness: resolves when every provider
/// is ready, rejects with the first initialization failure.
pub async fn when_synced_all(providers: &[Arc<dyn Provider>]) -> EpiResult<()> {
	let results =
		futures::future::join_all(providers.iter().map(|p| p.when_synced())).await;
	for result in results {
		result?;
	}
	Ok(())
}

/// Settle-all destruction: every provider's `destroy` runs to completion,
/// failures are logged and swallowed.
pub async fn destroy_all(providers: &[Arc<dyn Provider>]) {
	let results = futures::future::join_all(providers.iter().map(|p| p.destroy())).await;
	for (provider, result) in providers.iter().zip(results) {
		if let Err(err) = result {
			warn!(provider = provider.name(), error = %err, "provider destroy failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct FailingProvider(Readiness);

	#[async_trait]
	impl Provider for FailingProvider {
		fn name(&self) -> &str {
			"failing"
		}

		async fn when_synced(&self) -> EpiResult<()> {
			self.0.wait().await
		}

		async fn destroy(&self) -> EpiResult<()> {
			Err(Error::Internal("destroy exploded".into()))
		}
	}

	#[tokio::test]
	async fn test_readiness_resolves_once() {
		let readiness = Readiness::new();
		readiness.resolve();
		readiness.fail("too late");
		assert!(readiness.wait().await.is_ok());
	}

	#[tokio::test]
	async fn test_readiness_failure_surfaces_as_provider_init() {
		let readiness = Readiness::new();
		readiness.fail("disk on fire");
		let err = readiness.wait().await.unwrap_err();
		assert_eq!(err.code(), "E-PROVIDER-INIT");
		assert!(err.to_string().contains("disk on fire"));
	}

	#[tokio::test]
	async fn test_readiness_settles_for_late_subscribers() {
		let readiness = Readiness::new();
		readiness.resolve();
		// Subscribing after resolution still observes the settled state.
		assert!(readiness.wait().await.is_ok());
		assert!(readiness.wait().await.is_ok());
	}

	#[tokio::test]
	async fn test_noop_provider_is_already_synced() {
		let provider = NoopProvider::new("noop");
		assert!(provider.when_synced().await.is_ok());
		assert!(provider.destroy().await.is_ok());
		assert!(provider.destroy().await.is_ok());
	}

	#[tokio::test]
	async fn test_when_synced_all_rejects_on_failure() {
		let ready = Arc::new(NoopProvider::new("ok")) as Arc<dyn Provider>;
		let failing = Readiness::new();
		failing.fail("nope");
		let failing = Arc::new(FailingProvider(failing)) as Arc<dyn Provider>;
		let err = when_synced_all(&[ready, failing]).await.unwrap_err();
		assert_eq!(err.code(), "E-PROVIDER-INIT");
	}

	#[tokio::test]
	async fn test_destroy_all_settles_despite_failure() {
		let ready = Readiness::new();
		ready.resolve();
		let providers: Vec<Arc<dyn Provider>> = vec![
			Arc::new(FailingProvider(ready)),
			Arc::new(NoopProvider::new("survivor")),
		];
		// Must not panic or propagate the first provider's failure.
		destroy_all(&providers).await;
	}

	#[test]
	fn test_destroy_once() {
		let latch = DestroyOnce::default();
		assert!(!latch.is_destroyed());
		assert!(latch.begin());
		assert!(!latch.begin());
		assert!(latch.is_destroyed());
	}
}

// vim: ts=4
