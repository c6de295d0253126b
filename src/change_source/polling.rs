//! Polling change source
//!
//! Backends without change notifications (SMB, FTP, NFS, WebDAV) are observed
//! by listing the root on a fixed cadence and diffing consecutive listings.

use super::ChangeSource;
use crate::catalog::path_utils::{normalize_path, parent_path};
use crate::error::{Result, TrackerError};
use crate::events::{ChangeKind, FileChangeEvent, ProtocolMetadata, CHILD_COUNT_KEY};
use crate::fingerprint::quick_fingerprint;
use crate::protocol::{CapabilityRegistry, Protocol};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Cadence used when the registry has no poll interval for the protocol
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One file or directory in a listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListedEntry {
	/// Root-relative path
	pub path: String,
	pub is_directory: bool,
	pub size: u64,
	pub fingerprint: Option<String>,
	pub modified: Option<DateTime<Utc>>,
}

impl ListedEntry {
	pub fn file(path: &str, size: u64) -> Self {
		Self {
			path: normalize_path(path),
			is_directory: false,
			size,
			fingerprint: None,
			modified: None,
		}
	}

	pub fn directory(path: &str) -> Self {
		Self { is_directory: true, ..Self::file(path, 0) }
	}

	pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
		self.fingerprint = Some(fingerprint.into());
		self
	}
}

/// A listing keyed by path
pub type Snapshot = BTreeMap<String, ListedEntry>;

pub fn snapshot_from(entries: Vec<ListedEntry>) -> Snapshot {
	entries.into_iter().map(|entry| (entry.path.clone(), entry)).collect()
}

/// Lists a storage root. Remote protocol clients implement this.
#[async_trait::async_trait]
pub trait DirectoryLister: Send + Sync {
	async fn list(&self) -> Result<Vec<ListedEntry>>;
}

fn child_counts(snapshot: &Snapshot) -> HashMap<&str, u64> {
	let mut counts = HashMap::new();
	for path in snapshot.keys() {
		if let Some(parent) = parent_path(path) {
			*counts.entry(parent).or_insert(0) += 1;
		}
	}
	counts
}

fn to_event(
	kind: ChangeKind, entry: &ListedEntry, child_counts: &HashMap<&str, u64>, storage_root: &str,
	protocol: Protocol,
) -> FileChangeEvent {
	let mut metadata = ProtocolMetadata::new();
	if entry.is_directory {
		let children = child_counts.get(entry.path.as_str()).copied().unwrap_or(0);
		metadata.insert(CHILD_COUNT_KEY.to_string(), children.into());
	}
	FileChangeEvent::new(kind, storage_root, protocol, &entry.path, entry.is_directory, Some(entry.size))
		.with_fingerprint(entry.fingerprint.clone())
		.with_metadata(metadata)
}

/// Events that turn `previous` into `current`
///
/// Deletions come first, then creations, then modifications. Deletions and
/// creations are ordered shallowest first, so a moved directory is seen
/// before its contents.
pub fn diff_snapshots(
	previous: &Snapshot, current: &Snapshot, storage_root: &str, protocol: Protocol,
) -> Vec<FileChangeEvent> {
	let type_changed = |path: &str, is_directory: bool, other: &Snapshot| {
		other.get(path).is_some_and(|entry| entry.is_directory != is_directory)
	};

	let mut deleted: Vec<&ListedEntry> = previous
		.values()
		.filter(|entry| {
			!current.contains_key(&entry.path) || type_changed(&entry.path, entry.is_directory, current)
		})
		.collect();
	let mut created: Vec<&ListedEntry> = current
		.values()
		.filter(|entry| {
			!previous.contains_key(&entry.path) || type_changed(&entry.path, entry.is_directory, previous)
		})
		.collect();
	let modified: Vec<&ListedEntry> = current
		.values()
		.filter(|entry| !entry.is_directory)
		.filter(|entry| {
			previous.get(&entry.path).is_some_and(|before| {
				!before.is_directory
					&& (before.size != entry.size
						|| before.fingerprint != entry.fingerprint
						|| before.modified != entry.modified)
			})
		})
		.collect();

	deleted.sort_by(|a, b| (a.path.len(), &a.path).cmp(&(b.path.len(), &b.path)));
	created.sort_by(|a, b| (a.path.len(), &a.path).cmp(&(b.path.len(), &b.path)));

	let previous_counts = child_counts(previous);
	let current_counts = child_counts(current);

	let mut events = Vec::with_capacity(deleted.len() + created.len() + modified.len());
	events.extend(deleted.into_iter().map(|entry| {
		to_event(ChangeKind::Deleted, entry, &previous_counts, storage_root, protocol)
	}));
	events.extend(created.into_iter().map(|entry| {
		to_event(ChangeKind::Created, entry, &current_counts, storage_root, protocol)
	}));
	events.extend(modified.into_iter().map(|entry| {
		to_event(ChangeKind::Modified, entry, &current_counts, storage_root, protocol)
	}));
	events
}

/// Change source that re-lists a root every poll interval
pub struct PollingChangeSource<L> {
	storage_root: String,
	protocol: Protocol,
	interval: Duration,
	lister: L,
}

impl<L: DirectoryLister> PollingChangeSource<L> {
	pub fn new(storage_root: &str, protocol: Protocol, interval: Duration, lister: L) -> Self {
		Self { storage_root: storage_root.to_string(), protocol, interval, lister }
	}

	/// Poll at the cadence the registry prescribes for `protocol`
	pub fn from_registry(
		storage_root: &str, protocol: Protocol, registry: &CapabilityRegistry, lister: L,
	) -> Self {
		let interval = registry.capability_for(protocol).poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
		Self::new(storage_root, protocol, interval, lister)
	}

	pub fn lister(&self) -> &L {
		&self.lister
	}

	/// Take a fresh listing
	pub async fn snapshot(&self) -> Result<Snapshot> {
		Ok(snapshot_from(self.lister.list().await?))
	}

	/// List once and diff against `previous`
	pub async fn poll_once(&self, previous: &Snapshot) -> Result<(Snapshot, Vec<FileChangeEvent>)> {
		let current = self.snapshot().await?;
		let events = diff_snapshots(previous, &current, &self.storage_root, self.protocol);
		Ok((current, events))
	}
}

#[async_trait::async_trait]
impl<L: DirectoryLister> ChangeSource for PollingChangeSource<L> {
	fn storage_root(&self) -> &str {
		&self.storage_root
	}

	fn protocol(&self) -> Protocol {
		self.protocol
	}

	fn is_real_time(&self) -> bool {
		false
	}

	fn poll_interval(&self) -> Option<Duration> {
		Some(self.interval)
	}

	async fn run(
		&self, sender: mpsc::Sender<FileChangeEvent>, mut shutdown: watch::Receiver<bool>,
	) -> Result<()> {
		let mut snapshot = self.snapshot().await.map_err(|e| TrackerError::ChangeSource {
			storage_root: self.storage_root.clone(),
			reason: format!("initial listing failed: {e}"),
		})?;
		info!(
			storage_root = %self.storage_root,
			protocol = %self.protocol,
			interval = ?self.interval,
			entries = snapshot.len(),
			"Polling change source started"
		);

		let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				_ = ticker.tick() => {
					match self.poll_once(&snapshot).await {
						Ok((current, events)) => {
							if !events.is_empty() {
								debug!(storage_root = %self.storage_root, changes = events.len(), "Listing changed");
							}
							for event in events {
								if sender.send(event).await.is_err() {
									return Err(TrackerError::ChannelClosed);
								}
							}
							snapshot = current;
						}
						Err(e) => warn!(storage_root = %self.storage_root, "Listing failed, keeping previous snapshot: {}", e),
					}
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						break;
					}
				}
			}
		}

		info!(storage_root = %self.storage_root, "Polling change source stopped");
		Ok(())
	}
}

/// Lists a local directory tree (or a mounted remote share)
#[derive(Debug, Clone)]
pub struct LocalDirectoryLister {
	root: PathBuf,
	fingerprints: bool,
}

impl LocalDirectoryLister {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into(), fingerprints: true }
	}

	/// Skip content fingerprints; matches then rely on size alone
	pub fn without_fingerprints(mut self) -> Self {
		self.fingerprints = false;
		self
	}

	pub fn root(&self) -> &std::path::Path {
		&self.root
	}

	pub fn list_blocking(&self) -> Result<Vec<ListedEntry>> {
		let mut entries = Vec::new();

		for entry in WalkDir::new(&self.root).min_depth(1) {
			let entry = match entry {
				Ok(entry) => entry,
				// Vanished between readdir and stat
				Err(e) if e.io_error().is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) => {
					continue
				}
				Err(e) => return Err(std::io::Error::from(e).into()),
			};
			let Ok(relative) = entry.path().strip_prefix(&self.root) else {
				continue;
			};
			let Ok(metadata) = entry.metadata() else {
				continue;
			};

			let is_directory = metadata.is_dir();
			let fingerprint = if !is_directory && self.fingerprints {
				quick_fingerprint(entry.path()).ok().flatten()
			} else {
				None
			};

			entries.push(ListedEntry {
				path: normalize_path(&relative.to_string_lossy()),
				is_directory,
				size: if is_directory { 0 } else { metadata.len() },
				fingerprint,
				modified: metadata.modified().ok().map(DateTime::<Utc>::from),
			});
		}

		Ok(entries)
	}
}

#[async_trait::async_trait]
impl DirectoryLister for LocalDirectoryLister {
	async fn list(&self) -> Result<Vec<ListedEntry>> {
		let lister = self.clone();
		tokio::task::spawn_blocking(move || lister.list_blocking()).await.map_err(|e| {
			TrackerError::ChangeSource {
				storage_root: self.root.display().to_string(),
				reason: format!("listing task failed: {e}"),
			}
		})?
	}
}
