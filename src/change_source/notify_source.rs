//! Real-time change source for local storage roots, backed by `notify`

use super::ChangeSource;
use crate::catalog::path_utils::normalize_path;
use crate::error::{Result, TrackerError};
use crate::events::{ChangeKind, FileChangeEvent, ProtocolMetadata, CHILD_COUNT_KEY};
use crate::fingerprint::quick_fingerprint;
use crate::protocol::Protocol;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, watch};
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone)]
pub struct NotifyChangeSource {
	root: PathBuf,
	storage_root: String,
	fingerprints: bool,
}

impl NotifyChangeSource {
	pub fn new(root: impl Into<PathBuf>, storage_root: &str) -> Self {
		Self { root: root.into(), storage_root: storage_root.to_string(), fingerprints: true }
	}

	pub fn without_fingerprints(mut self) -> Self {
		self.fingerprints = false;
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn relative_path(&self, path: &Path) -> Option<String> {
		path.strip_prefix(&self.root)
			.ok()
			.map(|relative| normalize_path(&relative.to_string_lossy()))
	}

	/// Translate one notify event into catalog-relative change events
	///
	/// Deletions carry no size or type information; the tracker fills those in
	/// from the catalog row.
	pub fn convert_event(&self, event: &Event) -> Vec<FileChangeEvent> {
		match event.kind {
			EventKind::Access(_) => Vec::new(),
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
				[(ChangeKind::Deleted, &event.paths[0]), (ChangeKind::Created, &event.paths[1])]
					.into_iter()
					.filter_map(|(kind, path)| self.observe(kind, path))
					.collect()
			}
			EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
				let kind = ChangeKind::from(event.kind);
				event.paths.iter().filter_map(|path| self.observe(kind, path)).collect()
			}
			// Backends that cannot tell which side of a rename this is
			EventKind::Modify(ModifyKind::Name(_)) => event
				.paths
				.iter()
				.filter_map(|path| {
					let kind = if path.exists() { ChangeKind::Created } else { ChangeKind::Deleted };
					self.observe(kind, path)
				})
				.collect(),
			kind => {
				let kind = ChangeKind::from(kind);
				event.paths.iter().filter_map(|path| self.observe(kind, path)).collect()
			}
		}
	}

	fn observe(&self, kind: ChangeKind, path: &Path) -> Option<FileChangeEvent> {
		let relative = self.relative_path(path)?;
		if relative == "/" {
			return None;
		}

		if kind == ChangeKind::Deleted {
			return Some(FileChangeEvent::new(
				kind,
				&self.storage_root,
				Protocol::Local,
				&relative,
				false,
				None,
			));
		}

		// Gone again before we could look at it; the delete will follow
		let metadata = std::fs::metadata(path).ok()?;
		let is_directory = metadata.is_dir();
		if is_directory && kind == ChangeKind::Modified {
			return None;
		}

		let mut protocol_metadata = ProtocolMetadata::new();
		let (size, fingerprint) = if is_directory {
			let children = std::fs::read_dir(path).map(|entries| entries.count() as u64).unwrap_or(0);
			protocol_metadata.insert(CHILD_COUNT_KEY.to_string(), children.into());
			(None, None)
		} else {
			let fingerprint = if self.fingerprints {
				quick_fingerprint(path).ok().flatten()
			} else {
				None
			};
			(Some(metadata.len()), fingerprint)
		};

		Some(
			FileChangeEvent::new(
				kind,
				&self.storage_root,
				Protocol::Local,
				&relative,
				is_directory,
				size,
			)
			.with_fingerprint(fingerprint)
			.with_metadata(protocol_metadata),
		)
	}
}

#[async_trait::async_trait]
impl ChangeSource for NotifyChangeSource {
	fn storage_root(&self) -> &str {
		&self.storage_root
	}

	fn protocol(&self) -> Protocol {
		Protocol::Local
	}

	fn is_real_time(&self) -> bool {
		true
	}

	fn poll_interval(&self) -> Option<Duration> {
		None
	}

	async fn run(
		&self, sender: tokio_mpsc::Sender<FileChangeEvent>, mut shutdown: watch::Receiver<bool>,
	) -> Result<()> {
		if !self.root.is_dir() {
			return Err(TrackerError::ChangeSource {
				storage_root: self.storage_root.clone(),
				reason: format!("{} is not a directory", self.root.display()),
			});
		}

		let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
		let mut watcher = RecommendedWatcher::new(notify_tx, Config::default())?;
		watcher.watch(&self.root, RecursiveMode::Recursive)?;
		info!(root = %self.root.display(), storage_root = %self.storage_root, "Watching for changes");

		// notify delivers on a std channel; convert on a blocking thread since
		// conversion stats and fingerprints files
		let (bridge_tx, mut bridge_rx) = tokio_mpsc::unbounded_channel();
		let converter = self.clone();
		let bridge = tokio::task::spawn_blocking(move || {
			for result in notify_rx {
				match result {
					Ok(event) => {
						trace!("Received notify event: {:?}", event);
						for change in converter.convert_event(&event) {
							if bridge_tx.send(change).is_err() {
								return;
							}
						}
					}
					Err(e) => error!("Notify error: {}", e),
				}
			}
		});

		let result = loop {
			tokio::select! {
				received = bridge_rx.recv() => {
					let Some(change) = received else {
						break Ok(());
					};
					debug!(kind = ?change.kind, path = %change.path, "Local change");
					if sender.send(change).await.is_err() {
						break Err(TrackerError::ChannelClosed);
					}
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break Ok(());
					}
				}
			}
		};

		// Dropping the watcher closes the std channel and ends the bridge
		drop(watcher);
		drop(bridge_rx);
		if let Err(e) = bridge.await {
			error!("Notify bridge task panicked: {}", e);
		}

		info!(storage_root = %self.storage_root, "Stopped watching");
		result
	}
}
