use super::config::TrackerConfig;
use super::matching::select_candidate;
use super::monitoring::{CorrelationCounters, PendingSnapshot};
use super::pending::{PendingMove, PendingSet};
use crate::catalog::{RenameEvent, RenameStatus};
use crate::error::{Result, TrackerError};
use crate::events::{MatchMethod, ObservedEntry, SourceId};
use crate::protocol::CapabilityRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A deletion paired with the creation it most likely became
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedMove {
	/// Id of the rename event that will record this move
	pub rename_id: Uuid,
	pub pending: PendingMove,
	pub new_path: String,
	pub method: MatchMethod,
	pub matched_at: Instant,
}

impl MatchedMove {
	pub fn source_id(&self) -> SourceId {
		self.pending.source_id
	}

	pub fn old_path(&self) -> &str {
		&self.pending.old_path
	}

	pub fn is_directory(&self) -> bool {
		self.pending.is_directory
	}

	/// The in-flight rename event (status `pending`)
	pub fn rename_event(&self) -> RenameEvent {
		RenameEvent {
			id: self.rename_id,
			storage_root: self.pending.storage_root.clone(),
			protocol: self.pending.protocol,
			source_id: self.pending.source_id,
			old_path: self.pending.old_path.clone(),
			new_path: Some(self.new_path.clone()),
			is_directory: self.pending.is_directory,
			size: self.pending.size,
			file_hash: self.pending.fingerprint.clone(),
			match_method: Some(self.method),
			detected_at: self.pending.detected_at_utc,
			processed_at: None,
			status: RenameStatus::Pending,
		}
	}
}

/// Audit record for a deletion that expired without a matching creation
pub fn unmatched_event(pending: &PendingMove) -> RenameEvent {
	RenameEvent {
		id: Uuid::new_v4(),
		storage_root: pending.storage_root.clone(),
		protocol: pending.protocol,
		source_id: pending.source_id,
		old_path: pending.old_path.clone(),
		new_path: None,
		is_directory: pending.is_directory,
		size: pending.size,
		file_hash: pending.fingerprint.clone(),
		match_method: None,
		detected_at: pending.detected_at_utc,
		processed_at: None,
		status: RenameStatus::Pending,
	}
	.with_status(RenameStatus::Expired)
}

/// Everything one sweep pass reclaimed
#[derive(Debug, Default)]
pub struct ExpiredMoves {
	/// Deletions whose window elapsed without a match
	pub unmatched: Vec<PendingMove>,
	/// Deletions pushed out when the pending set was full
	pub evicted: Vec<PendingMove>,
	/// Matches whose commit never started
	pub stale_in_flight: Vec<MatchedMove>,
}

impl ExpiredMoves {
	pub fn len(&self) -> usize {
		self.unmatched.len() + self.evicted.len() + self.stale_in_flight.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[derive(Debug)]
struct InFlightMove {
	matched: MatchedMove,
	committing: bool,
}

#[derive(Debug, Default)]
struct EngineState {
	pending: PendingSet,
	in_flight: HashMap<Uuid, InFlightMove>,
	evicted: Vec<PendingMove>,
	counters: CorrelationCounters,
}

impl EngineState {
	fn committing_count(&self) -> usize {
		self.in_flight.values().filter(|in_flight| in_flight.committing).count()
	}
}

/// The pending-move correlation engine
///
/// All state sits behind one mutex. `track_delete` and `detect_create` hold it
/// only for in-memory work; catalog I/O happens after a move has been claimed.
#[derive(Debug)]
pub struct CorrelationEngine {
	state: Mutex<EngineState>,
	registry: Arc<CapabilityRegistry>,
	config: TrackerConfig,
	accepting: AtomicBool,
	commits_settled: Notify,
}

impl CorrelationEngine {
	pub fn new(config: TrackerConfig, registry: Arc<CapabilityRegistry>) -> Self {
		Self {
			state: Mutex::new(EngineState::default()),
			registry,
			config,
			accepting: AtomicBool::new(true),
			commits_settled: Notify::new(),
		}
	}

	fn lock(&self) -> MutexGuard<'_, EngineState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn registry(&self) -> &Arc<CapabilityRegistry> {
		&self.registry
	}

	pub fn config(&self) -> &TrackerConfig {
		&self.config
	}

	pub fn is_accepting(&self) -> bool {
		self.accepting.load(Ordering::SeqCst)
	}

	/// Record a deletion as a potential move source. A later deletion for the
	/// same source replaces the earlier one.
	pub fn track_delete(&self, source_id: SourceId, deleted: ObservedEntry) {
		if !self.is_accepting() {
			warn!(source_id, path = %deleted.path, "Ignoring deletion received after shutdown");
			self.lock().counters.ignored_after_shutdown += 1;
			return;
		}

		let pending = PendingMove::new(source_id, deleted);
		let mut state = self.lock();

		if state.pending.len() >= self.config.max_pending_moves && !state.pending.contains(source_id) {
			let evicted = state.pending.evict_oldest(self.config.eviction_batch());
			warn!(
				evicted = evicted.len(),
				capacity = self.config.max_pending_moves,
				"Pending move set full, evicting oldest entries"
			);
			state.counters.evicted_at_capacity += evicted.len() as u64;
			state.evicted.extend(evicted);
		}

		debug!(
			source_id,
			storage_root = %pending.storage_root,
			protocol = %pending.protocol,
			path = %pending.old_path,
			"Tracking deletion as potential move"
		);
		if state.pending.insert(pending).is_some() {
			state.counters.deletions_replaced += 1;
		}
		state.counters.deletions_tracked += 1;
	}

	/// Check whether a creation completes a tracked deletion. On a match the
	/// deletion leaves the pending set and becomes an in-flight move.
	pub fn detect_create(&self, created: &ObservedEntry) -> Option<MatchedMove> {
		if !self.is_accepting() {
			return None;
		}

		let window = self.registry.move_window(created.protocol);
		let now = Instant::now();

		let matched = {
			let mut guard = self.lock();
			let state = &mut *guard;
			state.counters.creations_checked += 1;

			let (source_id, method) = select_candidate(
				state.pending.candidates(&created.storage_root, created.protocol, created.is_directory),
				created,
				now,
				window,
				self.config.allow_heuristic_matches,
			)?;
			let pending = state.pending.remove(source_id)?;

			let matched = MatchedMove {
				rename_id: Uuid::new_v4(),
				pending,
				new_path: created.path.clone(),
				method,
				matched_at: now,
			};
			state
				.in_flight
				.insert(matched.rename_id, InFlightMove { matched: matched.clone(), committing: false });
			state.counters.record_match(method);
			matched
		};

		match matched.method {
			MatchMethod::Heuristic => warn!(
				event = "CorrelationAmbiguousAssumption",
				source_id = matched.source_id(),
				protocol = %matched.pending.protocol,
				from = %matched.old_path(),
				to = %matched.new_path,
				is_directory = matched.is_directory(),
				"Assuming move without fingerprint confirmation"
			),
			MatchMethod::Fingerprint => info!(
				source_id = matched.source_id(),
				protocol = %matched.pending.protocol,
				from = %matched.old_path(),
				to = %matched.new_path,
				"Detected move"
			),
		}

		Some(matched)
	}

	/// Mark an in-flight move as committing so the sweeper leaves it alone
	pub fn claim(&self, rename_id: Uuid) -> Result<MatchedMove> {
		let mut state = self.lock();
		match state.in_flight.get_mut(&rename_id) {
			Some(in_flight) if !in_flight.committing => {
				in_flight.committing = true;
				Ok(in_flight.matched.clone())
			}
			_ => Err(TrackerError::MoveNotInFlight { rename_id }),
		}
	}

	/// Finish a claimed move. After a directory is relocated, pending
	/// deletions of its old descendants are dropped; their rows moved with it.
	pub fn complete(&self, matched: &MatchedMove, relocated: bool) {
		{
			let mut state = self.lock();
			state.in_flight.remove(&matched.rename_id);
			if relocated {
				state.counters.moves_relocated += 1;
				if matched.is_directory() {
					let discarded = state
						.pending
						.remove_descendants(&matched.pending.storage_root, matched.old_path());
					if !discarded.is_empty() {
						debug!(
							directory = %matched.old_path(),
							discarded = discarded.len(),
							"Dropped pending deletions that moved with their directory"
						);
					}
				}
			} else {
				state.counters.moves_fell_back += 1;
			}
		}
		self.commits_settled.notify_waiters();
	}

	/// Give a claimed move back when nothing could be persisted; the sweeper
	/// will expire it after the commit timeout
	pub fn release(&self, rename_id: Uuid) {
		{
			let mut state = self.lock();
			if let Some(in_flight) = state.in_flight.get_mut(&rename_id) {
				in_flight.committing = false;
			}
		}
		self.commits_settled.notify_waiters();
	}

	pub fn record_commit_retry(&self) {
		self.lock().counters.commit_retries += 1;
	}

	/// Remove everything that can no longer become a move
	pub fn take_expired(&self, now: Instant) -> ExpiredMoves {
		let mut state = self.lock();
		let unmatched = state.pending.take_expired(now, &self.registry);
		let evicted = std::mem::take(&mut state.evicted);

		let commit_timeout = self.config.commit_timeout;
		let stale_ids: Vec<Uuid> = state
			.in_flight
			.iter()
			.filter(|(_, in_flight)| {
				!in_flight.committing
					&& now.saturating_duration_since(in_flight.matched.matched_at) >= commit_timeout
			})
			.map(|(rename_id, _)| *rename_id)
			.collect();
		let stale_in_flight: Vec<MatchedMove> = stale_ids
			.into_iter()
			.filter_map(|rename_id| state.in_flight.remove(&rename_id))
			.map(|in_flight| in_flight.matched)
			.collect();

		state.counters.expired_unmatched += (unmatched.len() + evicted.len()) as u64;
		state.counters.expired_in_flight += stale_in_flight.len() as u64;

		ExpiredMoves { unmatched, evicted, stale_in_flight }
	}

	/// Remove every pending deletion and every in-flight move not committing
	pub fn drain_all(&self) -> ExpiredMoves {
		let mut state = self.lock();
		let unmatched = state.pending.drain();
		let evicted = std::mem::take(&mut state.evicted);

		let idle_ids: Vec<Uuid> = state
			.in_flight
			.iter()
			.filter(|(_, in_flight)| !in_flight.committing)
			.map(|(rename_id, _)| *rename_id)
			.collect();
		let stale_in_flight: Vec<MatchedMove> = idle_ids
			.into_iter()
			.filter_map(|rename_id| state.in_flight.remove(&rename_id))
			.map(|in_flight| in_flight.matched)
			.collect();

		state.counters.expired_unmatched += (unmatched.len() + evicted.len()) as u64;
		state.counters.expired_in_flight += stale_in_flight.len() as u64;

		ExpiredMoves { unmatched, evicted, stale_in_flight }
	}

	/// Stop accepting new deletions and creations
	pub fn begin_shutdown(&self) {
		self.accepting.store(false, Ordering::SeqCst);
	}

	/// Wait until no move is committing, at most `grace`. Returns false on
	/// timeout.
	pub async fn wait_for_commits(&self, grace: Duration) -> bool {
		let wait = async {
			loop {
				let notified = self.commits_settled.notified();
				tokio::pin!(notified);
				notified.as_mut().enable();
				if self.lock().committing_count() == 0 {
					return;
				}
				notified.await;
			}
		};
		tokio::time::timeout(grace, wait).await.is_ok()
	}

	pub fn pending_count(&self) -> usize {
		self.lock().pending.len()
	}

	pub fn in_flight_count(&self) -> usize {
		self.lock().in_flight.len()
	}

	pub fn snapshot(&self) -> PendingSnapshot {
		let state = self.lock();
		PendingSnapshot {
			total_pending_moves: state.pending.len(),
			pending_by_protocol: state.pending.count_by_protocol(),
			in_flight_moves: state.in_flight.len(),
			counters: state.counters.clone(),
		}
	}
}
