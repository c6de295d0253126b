use crate::protocol::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog identity key of a file or directory row
pub type SourceId = i64;

/// Free-form per-protocol details attached to an observation (share name,
/// server inode, child count, ...)
pub type ProtocolMetadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key carrying the number of direct children of a directory
pub const CHILD_COUNT_KEY: &str = "child_count";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Created,
	Modified,
	Deleted,
}

impl From<notify::EventKind> for ChangeKind {
	fn from(kind: notify::EventKind) -> Self {
		use notify::event::{ModifyKind, RenameMode};
		match kind {
			notify::EventKind::Create(_) => ChangeKind::Created,
			notify::EventKind::Remove(_) => ChangeKind::Deleted,
			notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Deleted,
			notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
			_ => ChangeKind::Modified,
		}
	}
}

/// One observation produced by a change source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
	pub id: Uuid,
	pub kind: ChangeKind,
	pub storage_root: String,
	pub protocol: Protocol,
	/// Root-relative path, always `/`-separated and starting with `/`
	pub path: String,
	pub is_directory: bool,
	/// Best effort; unknown for most deletions
	pub size: Option<u64>,
	pub fingerprint: Option<String>,
	pub observed_at: DateTime<Utc>,
	#[serde(default)]
	pub metadata: ProtocolMetadata,
}

impl FileChangeEvent {
	pub fn new(
		kind: ChangeKind, storage_root: &str, protocol: Protocol, path: &str, is_directory: bool,
		size: Option<u64>,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			kind,
			storage_root: storage_root.to_string(),
			protocol,
			path: path.to_string(),
			is_directory,
			size,
			fingerprint: None,
			observed_at: Utc::now(),
			metadata: ProtocolMetadata::new(),
		}
	}

	pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
		self.fingerprint = fingerprint;
		self
	}

	pub fn with_metadata(mut self, metadata: ProtocolMetadata) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}
}

/// How a deletion and a creation were correlated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
	/// Size and content fingerprint agree on both sides
	Fingerprint,
	/// No fingerprint on at least one side; matched on root, protocol, kind,
	/// size (files only) and age
	Heuristic,
}

impl MatchMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			MatchMethod::Fingerprint => "fingerprint",
			MatchMethod::Heuristic => "heuristic",
		}
	}
}

/// A file or directory as seen on one side of a potential move
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEntry {
	pub storage_root: String,
	pub protocol: Protocol,
	pub path: String,
	pub is_directory: bool,
	pub size: u64,
	pub fingerprint: Option<String>,
	pub metadata: ProtocolMetadata,
}

impl ObservedEntry {
	pub fn file(storage_root: &str, protocol: Protocol, path: &str, size: u64) -> Self {
		Self {
			storage_root: storage_root.to_string(),
			protocol,
			path: path.to_string(),
			is_directory: false,
			size,
			fingerprint: None,
			metadata: ProtocolMetadata::new(),
		}
	}

	pub fn directory(storage_root: &str, protocol: Protocol, path: &str) -> Self {
		Self { is_directory: true, ..Self::file(storage_root, protocol, path, 0) }
	}

	pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
		self.fingerprint = Some(fingerprint.into());
		self
	}

	pub fn with_size(mut self, size: u64) -> Self {
		self.size = size;
		self
	}

	pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
		self.metadata.insert(key.to_string(), value.into());
		self
	}

	pub fn child_count(&self) -> Option<u64> {
		self.metadata.get(CHILD_COUNT_KEY).and_then(|value| value.as_u64())
	}
}

impl From<&FileChangeEvent> for ObservedEntry {
	fn from(event: &FileChangeEvent) -> Self {
		Self {
			storage_root: event.storage_root.clone(),
			protocol: event.protocol,
			path: event.path.clone(),
			is_directory: event.is_directory,
			size: event.size.unwrap_or(0),
			fingerprint: event.fingerprint.clone(),
			metadata: event.metadata.clone(),
		}
	}
}
