//! The rename tracker
//!
//! [`RenameTracker`] wires the correlation engine, the move processor, the
//! expiration sweeper and any number of change sources around one catalog.
//! Lifecycle is explicit: [`RenameTracker::new`], [`RenameTracker::start`],
//! [`RenameTracker::stop`].

use crate::catalog::path_utils::normalize_path;
use crate::catalog::{CatalogStore, NewEntry, RenameEvent, RenameEventFilter};
use crate::change_source::{ChangeSource, DirectoryLister};
use crate::correlation::{CorrelationEngine, MatchedMove, TrackerConfig, TrackerStatistics};
use crate::error::{Result, TrackerError};
use crate::events::{ChangeKind, FileChangeEvent, ObservedEntry, SourceId, CHILD_COUNT_KEY};
use crate::processor::{MoveOutcome, MoveProcessor};
use crate::protocol::{Protocol, ProtocolCapability};
use crate::sweeper::ExpirationSweeper;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What [`RenameTracker::handle_event`] did with one change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
	/// The deletion is now a pending move
	TrackedDelete { source_id: SourceId },
	/// Deletion of a path the catalog never indexed
	UnknownDelete,
	/// The creation completed a pending move
	Moved { rename_id: Uuid, outcome: MoveOutcome },
	/// A new row was indexed (or the live row at that path refreshed)
	Indexed { id: SourceId },
	/// Size and fingerprint of an existing row were updated
	Refreshed { id: SourceId },
	Ignored,
}

pub struct RenameTracker {
	catalog: Arc<dyn CatalogStore>,
	engine: Arc<CorrelationEngine>,
	processor: Arc<MoveProcessor>,
	sweeper: ExpirationSweeper,
	shutdown_tx: watch::Sender<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	started: AtomicBool,
}

impl RenameTracker {
	/// Validate `config` and build a tracker over `catalog`. Nothing runs
	/// until [`start`](Self::start).
	pub fn new(catalog: Arc<dyn CatalogStore>, config: TrackerConfig) -> Result<Self> {
		config.validate()?;

		let registry = Arc::new(config.registry());
		let engine = Arc::new(CorrelationEngine::new(config, registry));
		let processor = Arc::new(MoveProcessor::new(catalog.clone(), engine.clone()));
		let sweeper = ExpirationSweeper::new(engine.clone(), processor.clone());
		let (shutdown_tx, _) = watch::channel(false);

		Ok(Self {
			catalog,
			engine,
			processor,
			sweeper,
			shutdown_tx,
			tasks: Mutex::new(Vec::new()),
			started: AtomicBool::new(false),
		})
	}

	/// Spawn the expiration sweeper
	pub fn start(&self) -> Result<()> {
		if !self.engine.is_accepting() {
			return Err(TrackerError::ShuttingDown);
		}
		if self.started.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		let handle = self.sweeper.clone().spawn(self.shutdown_tx.subscribe());
		self.tasks().push(handle);
		info!(
			protocols = ?self.engine.registry().supported_protocols(),
			sweep_interval = ?self.engine.config().sweep_interval,
			"Rename tracker started"
		);
		Ok(())
	}

	/// Stop accepting events, let running commits finish within the grace
	/// period, then finalize everything still pending as expired. Returns the
	/// number of entries finalized during shutdown.
	pub async fn stop(&self) -> usize {
		let grace = self.engine.config().shutdown_grace;
		info!("Stopping rename tracker");

		self.engine.begin_shutdown();
		self.shutdown_tx.send_replace(true);

		if !self.engine.wait_for_commits(grace).await {
			warn!(grace = ?grace, "Commits still running after the shutdown grace period");
		}

		let remaining = self.engine.drain_all();
		let finalized = if remaining.is_empty() {
			0
		} else {
			info!(remaining = remaining.len(), "Finalizing pending moves left at shutdown");
			self.processor
				.finalize_expired(remaining, self.engine.config().audit_unmatched_expirations)
				.await
		};

		let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks());
		for mut handle in handles {
			if tokio::time::timeout(grace, &mut handle).await.is_err() {
				warn!("Background task did not stop in time, aborting it");
				handle.abort();
			}
		}

		info!(finalized, "Rename tracker stopped");
		finalized
	}

	fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
		self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Feed a change source into the tracker. The source runs on its own task
	/// and a router task applies its events in order.
	pub fn watch(self: &Arc<Self>, source: Arc<dyn ChangeSource>) -> Result<()> {
		if !self.engine.is_accepting() {
			return Err(TrackerError::ShuttingDown);
		}

		let (sender, mut receiver) = mpsc::channel(self.engine.config().event_channel_capacity);
		let shutdown = self.shutdown_tx.subscribe();

		info!(
			storage_root = source.storage_root(),
			protocol = %source.protocol(),
			real_time = source.is_real_time(),
			poll_interval = ?source.poll_interval(),
			"Watching storage root"
		);

		let source_task = tokio::spawn(async move {
			if let Err(e) = source.run(sender, shutdown).await {
				warn!(
					storage_root = source.storage_root(),
					category = e.category(),
					"Change source stopped with error: {}",
					e
				);
			}
		});

		let tracker = Arc::clone(self);
		let router_task = tokio::spawn(async move {
			while let Some(event) = receiver.recv().await {
				let path = event.path.clone();
				if let Err(e) = tracker.handle_event(event).await {
					warn!(path = %path, category = e.category(), "Failed to handle change event: {}", e);
				}
			}
			debug!("Event router stopped");
		});

		let mut tasks = self.tasks();
		tasks.push(source_task);
		tasks.push(router_task);
		Ok(())
	}

	/// Apply one change event: deletions become pending moves, creations are
	/// matched against them (and committed) or indexed, modifications refresh
	/// the row.
	pub async fn handle_event(&self, mut event: FileChangeEvent) -> Result<EventDisposition> {
		if !self.engine.is_accepting() {
			debug!(path = %event.path, "Ignoring change event during shutdown");
			return Ok(EventDisposition::Ignored);
		}

		event.path = normalize_path(&event.path);
		match event.kind {
			ChangeKind::Deleted => self.route_delete(&event).await,
			ChangeKind::Created => self.route_create(&event).await,
			ChangeKind::Modified => self.route_modify(&event).await,
		}
	}

	async fn route_delete(&self, event: &FileChangeEvent) -> Result<EventDisposition> {
		let Some(row) = self.catalog.lookup_entry(&event.storage_root, &event.path).await? else {
			debug!(storage_root = %event.storage_root, path = %event.path, "Deletion of an unindexed path");
			return Ok(EventDisposition::UnknownDelete);
		};

		// Sources rarely know what a deleted path was; the row does
		let mut deleted = ObservedEntry::from(event);
		deleted.is_directory = row.is_directory;
		deleted.size = event.size.unwrap_or(row.size);
		deleted.fingerprint = event.fingerprint.clone().or_else(|| row.quick_hash.clone());

		if row.is_directory && deleted.child_count().is_none() {
			let children = self
				.catalog
				.entries_under(&row.storage_root, &row.path)
				.await?
				.iter()
				.filter(|child| child.parent_id == Some(row.id))
				.count() as u64;
			deleted.metadata.insert(CHILD_COUNT_KEY.to_string(), children.into());
		}

		self.engine.track_delete(row.id, deleted);
		Ok(EventDisposition::TrackedDelete { source_id: row.id })
	}

	async fn route_create(&self, event: &FileChangeEvent) -> Result<EventDisposition> {
		let created = ObservedEntry::from(event);

		if let Some(matched) = self.engine.detect_create(&created) {
			return self.commit_create(&matched, event).await;
		}

		let row = self.catalog.upsert_entry(&new_entry(event)).await?;
		Ok(EventDisposition::Indexed { id: row.id })
	}

	async fn commit_create(
		&self, matched: &MatchedMove, event: &FileChangeEvent,
	) -> Result<EventDisposition> {
		let outcome = match self.processor.process_move(matched, &event.path).await {
			Ok(outcome) => outcome,
			// Expired or drained at shutdown before the commit started; the old
			// row is finalized elsewhere, so the new path is just a new file
			Err(TrackerError::MoveNotInFlight { rename_id }) => {
				debug!(%rename_id, path = %event.path, "Match left flight before commit, indexing as new");
				let row = self.catalog.upsert_entry(&new_entry(event)).await?;
				return Ok(EventDisposition::Indexed { id: row.id });
			}
			Err(e) => return Err(e),
		};

		match &outcome {
			MoveOutcome::Relocated { .. } => {
				if !event.is_directory && (event.size.is_some() || event.fingerprint.is_some()) {
					self.catalog
						.refresh_entry(
							&event.storage_root,
							&event.path,
							event.size,
							event.fingerprint.clone(),
						)
						.await?;
				}
			}
			// The old row is gone; index what is actually there now
			MoveOutcome::FellBackToDelete { .. } => {
				self.catalog.upsert_entry(&new_entry(event)).await?;
			}
		}
		Ok(EventDisposition::Moved { rename_id: matched.rename_id, outcome })
	}

	async fn route_modify(&self, event: &FileChangeEvent) -> Result<EventDisposition> {
		if event.is_directory {
			return Ok(EventDisposition::Ignored);
		}

		match self
			.catalog
			.refresh_entry(&event.storage_root, &event.path, event.size, event.fingerprint.clone())
			.await?
		{
			Some(row) => Ok(EventDisposition::Refreshed { id: row.id }),
			None => {
				let row = self.catalog.upsert_entry(&new_entry(event)).await?;
				Ok(EventDisposition::Indexed { id: row.id })
			}
		}
	}

	/// Index every entry a lister reports under `storage_root`, parents
	/// first. Returns the number of rows written.
	pub async fn index_root(&self, lister: &dyn DirectoryLister, storage_root: &str) -> Result<usize> {
		let mut listed = lister.list().await?;
		listed.sort_by(|a, b| (a.path.len(), &a.path).cmp(&(b.path.len(), &b.path)));

		for entry in &listed {
			let new = if entry.is_directory {
				NewEntry::directory(storage_root, &entry.path)
			} else {
				NewEntry::file(storage_root, &entry.path, entry.size, entry.fingerprint.clone())
			};
			self.catalog.upsert_entry(&new).await?;
		}

		info!(storage_root, entries = listed.len(), "Indexed storage root");
		Ok(listed.len())
	}

	pub fn capabilities(&self, protocol: &str) -> Result<ProtocolCapability> {
		self.engine.registry().capabilities(protocol)
	}

	pub fn poll_interval(&self, protocol: Protocol) -> Option<Duration> {
		self.engine.registry().capability_for(protocol).poll_interval
	}

	pub fn track_delete(&self, source_id: SourceId, deleted: ObservedEntry) {
		self.engine.track_delete(source_id, deleted);
	}

	pub fn detect_create(&self, created: &ObservedEntry) -> Option<MatchedMove> {
		self.engine.detect_create(created)
	}

	pub async fn process_move(&self, matched: &MatchedMove, new_path: &str) -> Result<MoveOutcome> {
		self.processor.process_move(matched, &normalize_path(new_path)).await
	}

	/// Run one expiration pass now
	pub async fn sweep_now(&self) -> usize {
		self.sweeper.sweep_once().await
	}

	pub async fn get_statistics(&self) -> Result<TrackerStatistics> {
		let renames = self.catalog.rename_counts().await?;
		Ok(TrackerStatistics::new(
			self.engine.snapshot(),
			self.engine.registry().supported_protocols(),
			renames,
		))
	}

	pub async fn recent_rename_events(&self, limit: usize) -> Result<Vec<RenameEvent>> {
		self.rename_events(&RenameEventFilter::new().limit(limit)).await
	}

	pub async fn rename_events(&self, filter: &RenameEventFilter) -> Result<Vec<RenameEvent>> {
		Ok(self.catalog.rename_events(filter).await?)
	}

	pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
		&self.catalog
	}

	pub fn engine(&self) -> &Arc<CorrelationEngine> {
		&self.engine
	}
}

fn new_entry(event: &FileChangeEvent) -> NewEntry {
	if event.is_directory {
		NewEntry::directory(&event.storage_root, &event.path)
	} else {
		NewEntry::file(
			&event.storage_root,
			&event.path,
			event.size.unwrap_or(0),
			event.fingerprint.clone(),
		)
	}
}
