use crate::catalog::path_utils::is_descendant;
use crate::events::{ObservedEntry, ProtocolMetadata, SourceId, CHILD_COUNT_KEY};
use crate::protocol::{CapabilityRegistry, Protocol};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// A deletion waiting for the creation that would make it a move
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
	pub source_id: SourceId,
	pub storage_root: String,
	pub protocol: Protocol,
	pub old_path: String,
	pub is_directory: bool,
	pub size: u64,
	pub fingerprint: Option<String>,
	pub metadata: ProtocolMetadata,
	/// Monotonic timestamp used for window arithmetic
	pub detected_at: Instant,
	/// Wall-clock timestamp persisted on the rename event
	pub detected_at_utc: DateTime<Utc>,
}

impl PendingMove {
	/// Stamp a deletion with the current time
	pub fn new(source_id: SourceId, deleted: ObservedEntry) -> Self {
		Self {
			source_id,
			storage_root: deleted.storage_root,
			protocol: deleted.protocol,
			old_path: deleted.path,
			is_directory: deleted.is_directory,
			size: deleted.size,
			fingerprint: deleted.fingerprint,
			metadata: deleted.metadata,
			detected_at: Instant::now(),
			detected_at_utc: Utc::now(),
		}
	}

	pub fn age(&self, now: Instant) -> Duration {
		now.saturating_duration_since(self.detected_at)
	}

	/// A deletion is no longer eligible once its full window has elapsed
	pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
		self.age(now) >= window
	}

	pub fn child_count(&self) -> Option<u64> {
		self.metadata.get(CHILD_COUNT_KEY).and_then(|value| value.as_u64())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
	storage_root: String,
	protocol: Protocol,
	is_directory: bool,
}

impl BucketKey {
	fn new(storage_root: &str, protocol: Protocol, is_directory: bool) -> Self {
		Self { storage_root: storage_root.to_string(), protocol, is_directory }
	}

	fn of(pending: &PendingMove) -> Self {
		Self::new(&pending.storage_root, pending.protocol, pending.is_directory)
	}
}

/// Insertion order breaks ties between deletions stamped with the same instant
type BucketOrder = (Instant, u64);

#[derive(Debug)]
struct PendingSlot {
	pending: PendingMove,
	order: BucketOrder,
}

/// Pending deletions keyed by source id, with a secondary index per
/// `(storage_root, protocol, is_directory)` ordered oldest first
#[derive(Debug, Default)]
pub struct PendingSet {
	entries: HashMap<SourceId, PendingSlot>,
	buckets: HashMap<BucketKey, BTreeMap<BucketOrder, SourceId>>,
	next_seq: u64,
}

impl PendingSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, source_id: SourceId) -> bool {
		self.entries.contains_key(&source_id)
	}

	pub fn get(&self, source_id: SourceId) -> Option<&PendingMove> {
		self.entries.get(&source_id).map(|slot| &slot.pending)
	}

	/// Insert a deletion, replacing any earlier one for the same source
	pub fn insert(&mut self, pending: PendingMove) -> Option<PendingMove> {
		let replaced = self.remove(pending.source_id);

		let order = (pending.detected_at, self.next_seq);
		self.next_seq += 1;
		self.buckets
			.entry(BucketKey::of(&pending))
			.or_default()
			.insert(order, pending.source_id);
		self.entries.insert(pending.source_id, PendingSlot { pending, order });

		replaced
	}

	pub fn remove(&mut self, source_id: SourceId) -> Option<PendingMove> {
		let slot = self.entries.remove(&source_id)?;
		let key = BucketKey::of(&slot.pending);
		if let Some(bucket) = self.buckets.get_mut(&key) {
			bucket.remove(&slot.order);
			if bucket.is_empty() {
				self.buckets.remove(&key);
			}
		}
		Some(slot.pending)
	}

	/// Candidates for a creation, oldest first
	pub fn candidates(
		&self, storage_root: &str, protocol: Protocol, is_directory: bool,
	) -> impl Iterator<Item = &PendingMove> + '_ {
		self.buckets
			.get(&BucketKey::new(storage_root, protocol, is_directory))
			.into_iter()
			.flat_map(|bucket| bucket.values())
			.filter_map(|source_id| self.get(*source_id))
	}

	/// Remove every entry whose protocol window has elapsed
	pub fn take_expired(&mut self, now: Instant, registry: &CapabilityRegistry) -> Vec<PendingMove> {
		let mut expired_ids = Vec::new();
		for (key, bucket) in &self.buckets {
			let window = registry.move_window(key.protocol);
			expired_ids.extend(
				bucket
					.iter()
					.take_while(|((detected_at, _), _)| now.saturating_duration_since(*detected_at) >= window)
					.map(|(_, source_id)| *source_id),
			);
		}
		expired_ids.into_iter().filter_map(|source_id| self.remove(source_id)).collect()
	}

	/// Remove the `count` oldest entries across every bucket
	pub fn evict_oldest(&mut self, count: usize) -> Vec<PendingMove> {
		let mut by_age: Vec<(BucketOrder, SourceId)> =
			self.entries.iter().map(|(source_id, slot)| (slot.order, *source_id)).collect();
		by_age.sort_unstable();
		by_age
			.into_iter()
			.take(count)
			.filter_map(|(_, source_id)| self.remove(source_id))
			.collect()
	}

	/// Remove pending deletions that lived below `directory`
	pub fn remove_descendants(&mut self, storage_root: &str, directory: &str) -> Vec<PendingMove> {
		let ids: Vec<SourceId> = self
			.entries
			.values()
			.filter(|slot| {
				slot.pending.storage_root == storage_root
					&& is_descendant(&slot.pending.old_path, directory)
			})
			.map(|slot| slot.pending.source_id)
			.collect();
		ids.into_iter().filter_map(|source_id| self.remove(source_id)).collect()
	}

	/// Empty the set, oldest first
	pub fn drain(&mut self) -> Vec<PendingMove> {
		let count = self.entries.len();
		self.evict_oldest(count)
	}

	pub fn count_by_protocol(&self) -> BTreeMap<Protocol, usize> {
		let mut counts = BTreeMap::new();
		for slot in self.entries.values() {
			*counts.entry(slot.pending.protocol).or_insert(0) += 1;
		}
		counts
	}
}
