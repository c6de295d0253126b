//! Type definitions for catalog storage

use super::path_utils::{file_name, normalize_path};
use crate::events::{MatchMethod, SourceId};
use crate::protocol::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A file or directory row in the catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
	/// Identity key; survives renames and moves
	pub id: SourceId,

	/// Storage root the entry lives under
	pub storage_root: String,

	/// Root-relative path
	pub path: String,

	/// Last path segment
	pub name: String,

	/// Row id of the containing directory, when the catalog knows it
	pub parent_id: Option<SourceId>,

	pub is_directory: bool,

	pub size: u64,

	/// Quick content fingerprint
	pub quick_hash: Option<String>,

	/// Soft-delete flag; deleted rows keep their last path for auditing
	pub deleted: bool,

	pub deleted_at: Option<DateTime<Utc>>,

	pub modified_at: DateTime<Utc>,

	pub last_scan_at: DateTime<Utc>,
}

/// Values needed to index a new file or directory
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
	pub storage_root: String,
	pub path: String,
	pub is_directory: bool,
	pub size: u64,
	pub quick_hash: Option<String>,
}

impl NewEntry {
	pub fn file(storage_root: &str, path: &str, size: u64, quick_hash: Option<String>) -> Self {
		Self {
			storage_root: storage_root.to_string(),
			path: normalize_path(path),
			is_directory: false,
			size,
			quick_hash,
		}
	}

	pub fn directory(storage_root: &str, path: &str) -> Self {
		Self { is_directory: true, ..Self::file(storage_root, path, 0, None) }
	}

	pub fn name(&self) -> &str {
		file_name(&self.path)
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RenameStatus {
	Pending,
	Processed,
	Expired,
	Failed,
}

impl RenameStatus {
	pub const ALL: [RenameStatus; 4] =
		[RenameStatus::Pending, RenameStatus::Processed, RenameStatus::Expired, RenameStatus::Failed];

	pub fn as_str(&self) -> &'static str {
		match self {
			RenameStatus::Pending => "pending",
			RenameStatus::Processed => "processed",
			RenameStatus::Expired => "expired",
			RenameStatus::Failed => "failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, RenameStatus::Pending)
	}
}

impl fmt::Display for RenameStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Durable audit record of one correlation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenameEvent {
	pub id: Uuid,
	pub storage_root: String,
	pub protocol: Protocol,
	pub source_id: SourceId,
	pub old_path: String,
	/// Absent when the deletion expired without a matching creation
	pub new_path: Option<String>,
	pub is_directory: bool,
	pub size: u64,
	pub file_hash: Option<String>,
	pub match_method: Option<MatchMethod>,
	pub detected_at: DateTime<Utc>,
	pub processed_at: Option<DateTime<Utc>>,
	pub status: RenameStatus,
}

impl RenameEvent {
	/// Move to a terminal status, stamping `processed_at`
	pub fn with_status(mut self, status: RenameStatus) -> Self {
		self.status = status;
		self.processed_at = if status.is_terminal() { Some(Utc::now()) } else { None };
		self
	}

	pub fn is_heuristic(&self) -> bool {
		self.match_method == Some(MatchMethod::Heuristic)
	}
}

/// Query over persisted rename events. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct RenameEventFilter {
	pub storage_root: Option<String>,
	pub status: Option<RenameStatus>,
	pub protocol: Option<Protocol>,
	pub limit: Option<usize>,
}

impl RenameEventFilter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn storage_root(mut self, storage_root: &str) -> Self {
		self.storage_root = Some(storage_root.to_string());
		self
	}

	pub fn status(mut self, status: RenameStatus) -> Self {
		self.status = Some(status);
		self
	}

	pub fn protocol(mut self, protocol: Protocol) -> Self {
		self.protocol = Some(protocol);
		self
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn matches(&self, event: &RenameEvent) -> bool {
		self.storage_root.as_ref().map_or(true, |root| *root == event.storage_root)
			&& self.status.map_or(true, |status| status == event.status)
			&& self.protocol.map_or(true, |protocol| protocol == event.protocol)
	}
}

/// Persisted rename event counts
///
/// `by_status` and `by_protocol` count matched moves only. Audit records of
/// deletions that expired without a match are counted apart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenameCounts {
	pub by_status: BTreeMap<RenameStatus, u64>,
	pub by_protocol: BTreeMap<Protocol, BTreeMap<RenameStatus, u64>>,
	pub unmatched_by_protocol: BTreeMap<Protocol, u64>,
}

impl RenameCounts {
	pub fn total(&self) -> u64 {
		self.by_status.values().sum()
	}

	pub fn unmatched(&self) -> u64 {
		self.unmatched_by_protocol.values().sum()
	}

	pub fn count(&self, status: RenameStatus) -> u64 {
		self.by_status.get(&status).copied().unwrap_or(0)
	}

	pub fn for_protocol(&self, protocol: Protocol, status: RenameStatus) -> u64 {
		self.by_protocol
			.get(&protocol)
			.and_then(|counts| counts.get(&status))
			.copied()
			.unwrap_or(0)
	}
}

/// Everything the store needs to relocate one entry (and its subtree)
#[derive(Debug, Clone, PartialEq)]
pub struct RelocationRequest {
	pub storage_root: String,
	pub source_id: SourceId,
	pub old_path: String,
	pub new_path: String,
	pub is_directory: bool,
}
