//! Filesystem persistence provider for Epicenter documents.
//!
//! # Storage Layout
//!
//! One document maps to files under its storage key:
//!
//! ```text
//! <root>/
//!   registry.bin
//!   workspaces/
//!     {workspaceId}/
//!       head.bin
//!       {epoch}/
//!         data.bin             binary snapshot, source of truth
//!         data.json            human-readable mirror, write-only
//!         snapshots/
//!           {unix-ms}.bin      final snapshot written on destroy
//! ```
//!
//! The binary snapshot is rewritten on every CRDT update. The JSON mirror
//! is a debounced (default 500 ms), coalesced debugging aid and is never
//! read back.
//!
//! # Writer task
//!
//! Update observers run inside the committing transaction and must not
//! reopen the document. The provider therefore forwards each update delta
//! to a writer task that owns a shadow replica: deltas are applied to the
//! shadow in commit order, and snapshots are encoded from the shadow
//! without ever touching the live document.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use epicenter_crdt::doc::{DocHandle, UpdateObserver};
use epicenter_crdt::provider::{ProviderContext, ProviderFactory};
use epicenter_types::error::EpiResult;
use epicenter_types::lifecycle::{DestroyOnce, Provider, Readiness};
use epicenter_types::types::Timestamp;

/// Origin tag carried by transactions this provider applies to the
/// document, so observers can distinguish loads from live edits.
pub const FS_ORIGIN: &str = "persist-fs";

/// Provider configuration.
#[derive(Clone, Debug)]
pub struct FsPersistOptions {
	/// Write the JSON mirror at all.
	pub mirror_enabled: bool,
	/// Debounce window for mirror writes. Bursts within the window
	/// coalesce into one write.
	pub mirror_debounce: Duration,
}

impl Default for FsPersistOptions {
	fn default() -> Self {
		Self { mirror_enabled: true, mirror_debounce: Duration::from_millis(500) }
	}
}

/// Factory producing filesystem persistence providers rooted at one
/// application data directory.
#[derive(Debug)]
pub struct FsPersistFactory {
	root: PathBuf,
	opts: FsPersistOptions,
}

impl FsPersistFactory {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into(), opts: FsPersistOptions::default() }
	}

	pub fn with_options(root: impl Into<PathBuf>, opts: FsPersistOptions) -> Self {
		Self { root: root.into(), opts }
	}
}

#[async_trait]
impl ProviderFactory for FsPersistFactory {
	async fn attach(&self, ctx: ProviderContext) -> EpiResult<Arc<dyn Provider>> {
		// Providers attached through an orchestrator get the derived data
		// directory; a bare factory root works the same way.
		let root = ctx
			.paths
			.as_ref()
			.map(|paths| paths.data_dir.clone())
			.unwrap_or_else(|| self.root.clone());
		let files = DocFiles::new(&root, &ctx.storage_key);

		let readiness = Readiness::new();
		let provider = FsPersistProvider {
			storage_key: ctx.storage_key.to_string(),
			readiness,
			destroyed: DestroyOnce::default(),
			writer: Mutex::new(None),
		};

		if let Err(err) = tokio::fs::create_dir_all(&files.dir).await {
			provider.readiness.fail(format!("create {}: {}", files.dir.display(), err));
			return Ok(Arc::new(provider));
		}

		// Load the existing snapshot, if any. A corrupt snapshot fails
		// readiness instead of silently starting fresh.
		match tokio::fs::read(&files.bin).await {
			Ok(snapshot) => {
				if let Err(err) = ctx.doc.apply_update(&snapshot, Some(FS_ORIGIN.into())) {
					provider
						.readiness
						.fail(format!("load {}: {}", files.bin.display(), err));
					return Ok(Arc::new(provider));
				}
				debug!(key = %provider.storage_key, "snapshot loaded");
			}
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
			Err(err) => {
				provider.readiness.fail(format!("read {}: {}", files.bin.display(), err));
				return Ok(Arc::new(provider));
			}
		}

		// Shadow replica for the writer task, seeded with the state that
		// exists right now (including writes from before this attach).
		let shadow = DocHandle::new(format!("{}-shadow", ctx.storage_key));
		let current = ctx.doc.encode_state()?;
		shadow.apply_update(&current, None)?;

		let (tx, rx) = mpsc::unbounded_channel();
		let observer_tx = tx.clone();
		let observer = ctx.doc.observe_update(move |update, origin| {
			if origin.as_deref() == Some(FS_ORIGIN) {
				return;
			}
			let _ = observer_tx.send(WriterMsg::Update(update.to_vec()));
		})?;

		let task = tokio::spawn(writer_loop(rx, shadow, files, self.opts.clone()));
		// Persist the attach-time state immediately.
		let _ = tx.send(WriterMsg::Update(current));

		*provider.writer.lock() = Some(WriterHandle { tx, task, _observer: observer });
		provider.readiness.resolve();
		Ok(Arc::new(provider))
	}
}

enum WriterMsg {
	Update(Vec<u8>),
	Shutdown,
}

struct WriterHandle {
	tx: mpsc::UnboundedSender<WriterMsg>,
	task: tokio::task::JoinHandle<()>,
	_observer: UpdateObserver,
}

/// Filesystem persistence provider for one document.
pub struct FsPersistProvider {
	storage_key: String,
	readiness: Readiness,
	destroyed: DestroyOnce,
	writer: Mutex<Option<WriterHandle>>,
}

impl std::fmt::Debug for FsPersistProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FsPersistProvider").field("storage_key", &self.storage_key).finish()
	}
}

#[async_trait]
impl Provider for FsPersistProvider {
	fn name(&self) -> &str {
		FS_ORIGIN
	}

	async fn when_synced(&self) -> EpiResult<()> {
		self.readiness.wait().await
	}

	async fn destroy(&self) -> EpiResult<()> {
		if !self.destroyed.begin() {
			return Ok(());
		}
		let writer = self.writer.lock().take();
		if let Some(writer) = writer {
			// Final flush: the writer drains pending work, writes the
			// mirror if one is due, and drops a timestamped snapshot.
			let _ = writer.tx.send(WriterMsg::Shutdown);
			drop(writer.tx);
			if let Err(err) = writer.task.await {
				warn!(key = %self.storage_key, error = %err, "writer task failed");
			}
		}
		debug!(key = %self.storage_key, "provider destroyed");
		Ok(())
	}
}

/// File locations derived from a storage key.
#[derive(Clone, Debug)]
struct DocFiles {
	dir: PathBuf,
	bin: PathBuf,
	tmp: PathBuf,
	json: PathBuf,
	snapshots: PathBuf,
}

impl DocFiles {
	fn new(root: &Path, storage_key: &str) -> Self {
		let base = root.join(storage_key);
		let dir = base.parent().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
		Self {
			bin: base.with_extension("bin"),
			tmp: base.with_extension("bin.tmp"),
			json: base.with_extension("json"),
			snapshots: dir.join("snapshots"),
			dir,
		}
	}
}

async fn writer_loop(
	mut rx: mpsc::UnboundedReceiver<WriterMsg>,
	shadow: DocHandle,
	files: DocFiles,
	opts: FsPersistOptions,
) {
	let mut mirror_due: Option<tokio::time::Instant> = None;
	loop {
		let msg = if let Some(due) = mirror_due {
			tokio::select! {
				msg = rx.recv() => msg,
				_ = tokio::time::sleep_until(due) => {
					write_mirror(&shadow, &files).await;
					mirror_due = None;
					continue;
				}
			}
		} else {
			rx.recv().await
		};

		match msg {
			Some(WriterMsg::Update(update)) => {
				if let Err(err) = shadow.apply_update(&update, None) {
					warn!(file = %files.bin.display(), error = %err, "shadow apply failed");
					continue;
				}
				write_snapshot(&shadow, &files).await;
				if opts.mirror_enabled {
					mirror_due = Some(tokio::time::Instant::now() + opts.mirror_debounce);
				}
			}
			Some(WriterMsg::Shutdown) | None => {
				if mirror_due.is_some() {
					write_mirror(&shadow, &files).await;
				}
				write_final_snapshot(&shadow, &files).await;
				return;
			}
		}
	}
}

/// Rewrite the binary snapshot through a temp file so a crash mid-write
/// never leaves a truncated source of truth.
async fn write_snapshot(shadow: &DocHandle, files: &DocFiles) {
	let state = match shadow.encode_state() {
		Ok(state) => state,
		Err(err) => {
			warn!(file = %files.bin.display(), error = %err, "snapshot encode failed");
			return;
		}
	};
	if let Err(err) = tokio::fs::write(&files.tmp, &state).await {
		warn!(file = %files.tmp.display(), error = %err, "snapshot write failed");
		return;
	}
	if let Err(err) = tokio::fs::rename(&files.tmp, &files.bin).await {
		warn!(file = %files.bin.display(), error = %err, "snapshot rename failed");
	}
}

async fn write_mirror(shadow: &DocHandle, files: &DocFiles) {
	let json = match shadow.to_json() {
		Ok(json) => json,
		Err(err) => {
			warn!(file = %files.json.display(), error = %err, "mirror encode failed");
			return;
		}
	};
	let pretty = match serde_json::to_vec_pretty(&json) {
		Ok(bytes) => bytes,
		Err(err) => {
			warn!(file = %files.json.display(), error = %err, "mirror serialize failed");
			return;
		}
	};
	if let Err(err) = tokio::fs::write(&files.json, &pretty).await {
		warn!(file = %files.json.display(), error = %err, "mirror write failed");
	}
}

async fn write_final_snapshot(shadow: &DocHandle, files: &DocFiles) {
	let state = match shadow.encode_state() {
		Ok(state) => state,
		Err(err) => {
			warn!(dir = %files.snapshots.display(), error = %err, "final snapshot encode failed");
			return;
		}
	};
	if let Err(err) = tokio::fs::create_dir_all(&files.snapshots).await {
		warn!(dir = %files.snapshots.display(), error = %err, "snapshot dir create failed");
		return;
	}
	let path = files.snapshots.join(format!("{}.bin", Timestamp::now()));
	if let Err(err) = tokio::fs::write(&path, &state).await {
		warn!(file = %path.display(), error = %err, "final snapshot write failed");
	}
}

// vim: ts=4
