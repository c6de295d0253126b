use crate::catalog::{RenameCounts, RenameStatus};
use crate::events::MatchMethod;
use crate::protocol::Protocol;
use serde::Serialize;
use std::collections::BTreeMap;

/// In-memory counters kept by the correlation engine since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorrelationCounters {
	pub deletions_tracked: u64,
	pub deletions_replaced: u64,
	pub creations_checked: u64,
	pub fingerprint_matches: u64,
	pub heuristic_matches: u64,
	pub moves_relocated: u64,
	pub moves_fell_back: u64,
	/// Catalog commit attempts repeated after a transient failure
	pub commit_retries: u64,
	pub expired_unmatched: u64,
	pub expired_in_flight: u64,
	pub evicted_at_capacity: u64,
	pub ignored_after_shutdown: u64,
}

impl CorrelationCounters {
	pub fn record_match(&mut self, method: MatchMethod) {
		match method {
			MatchMethod::Fingerprint => self.fingerprint_matches += 1,
			MatchMethod::Heuristic => self.heuristic_matches += 1,
		}
	}

	pub fn total_matches(&self) -> u64 {
		self.fingerprint_matches + self.heuristic_matches
	}
}

/// Point-in-time view of the pending set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingSnapshot {
	pub total_pending_moves: usize,
	pub pending_by_protocol: BTreeMap<Protocol, usize>,
	pub in_flight_moves: usize,
	pub counters: CorrelationCounters,
}

/// Aggregate statistics combining the live engine state with the persisted
/// rename history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerStatistics {
	pub total_pending_moves: usize,
	pub pending_by_protocol: BTreeMap<Protocol, usize>,
	pub in_flight_moves: usize,
	pub supported_protocols: Vec<Protocol>,
	/// Matched moves with a persisted rename event
	pub total_renames: u64,
	pub successful_renames: u64,
	pub failed_renames: u64,
	/// Matched moves whose commit never started
	pub expired_renames: u64,
	/// Percentage of matched moves that were processed
	pub success_rate: f64,
	pub renames_by_protocol: BTreeMap<Protocol, BTreeMap<RenameStatus, u64>>,
	/// Deletions that expired without a matching creation
	pub unmatched_deletions: u64,
	pub unmatched_by_protocol: BTreeMap<Protocol, u64>,
	pub counters: CorrelationCounters,
}

impl TrackerStatistics {
	pub fn new(snapshot: PendingSnapshot, supported_protocols: Vec<Protocol>, renames: RenameCounts) -> Self {
		let total_renames = renames.total();
		let successful_renames = renames.count(RenameStatus::Processed);
		let unmatched_deletions = renames.unmatched();
		let success_rate = if total_renames > 0 {
			successful_renames as f64 / total_renames as f64 * 100.0
		} else {
			0.0
		};

		Self {
			total_pending_moves: snapshot.total_pending_moves,
			pending_by_protocol: snapshot.pending_by_protocol,
			in_flight_moves: snapshot.in_flight_moves,
			supported_protocols,
			total_renames,
			successful_renames,
			failed_renames: renames.count(RenameStatus::Failed),
			expired_renames: renames.count(RenameStatus::Expired),
			success_rate,
			renames_by_protocol: renames.by_protocol,
			unmatched_deletions,
			unmatched_by_protocol: renames.unmatched_by_protocol,
			counters: snapshot.counters,
		}
	}

	/// Share of matches made without fingerprint confirmation
	pub fn heuristic_share(&self) -> f64 {
		let total = self.counters.total_matches();
		if total == 0 {
			0.0
		} else {
			self.counters.heuristic_matches as f64 / total as f64
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_success_rate() {
		let mut renames = RenameCounts::default();
		renames.by_status.insert(RenameStatus::Processed, 3);
		renames.by_status.insert(RenameStatus::Expired, 1);
		renames.unmatched_by_protocol.insert(Protocol::Smb, 6);

		let stats = TrackerStatistics::new(PendingSnapshot::default(), Protocol::ALL.to_vec(), renames);
		assert_eq!(stats.total_renames, 4);
		assert_eq!(stats.successful_renames, 3);
		assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
		assert_eq!(stats.unmatched_deletions, 6);
	}

	#[test]
	fn test_empty_history_has_zero_rate() {
		let stats =
			TrackerStatistics::new(PendingSnapshot::default(), Vec::new(), RenameCounts::default());
		assert_eq!(stats.success_rate, 0.0);
		assert_eq!(stats.heuristic_share(), 0.0);
	}

	#[test]
	fn test_match_counters() {
		let mut counters = CorrelationCounters::default();
		counters.record_match(MatchMethod::Heuristic);
		counters.record_match(MatchMethod::Fingerprint);
		counters.record_match(MatchMethod::Fingerprint);
		assert_eq!(counters.total_matches(), 3);
		assert_eq!(counters.heuristic_matches, 1);
	}
}
