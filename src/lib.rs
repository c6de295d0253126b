pub mod catalog;
pub mod change_source;
mod config_serde;
pub mod correlation;
mod error;
mod events;
pub mod fingerprint;
pub mod processor;
mod protocol;
pub mod sweeper;
mod tracker;

pub use catalog::{
	CatalogConfig, CatalogEntry, CatalogError, CatalogStore, NewEntry, RedbCatalog, RenameEvent,
	RenameEventFilter, RenameStatus,
};
pub use change_source::{
	ChangeSource, DirectoryLister, ListedEntry, LocalDirectoryLister, NotifyChangeSource,
	PollingChangeSource,
};
pub use correlation::{CorrelationEngine, MatchedMove, TrackerConfig, TrackerStatistics};
pub use error::{ErrorRecoveryConfig, Result, TrackerError};
pub use events::{
	ChangeKind, FileChangeEvent, MatchMethod, ObservedEntry, ProtocolMetadata, SourceId,
	CHILD_COUNT_KEY,
};
pub use processor::{MoveOutcome, MoveProcessor};
pub use protocol::{CapabilityRegistry, Protocol, ProtocolCapability};
pub use tracker::{EventDisposition, RenameTracker};
