//! The catalog storage boundary used by the tracker

use super::error::CatalogResult;
use super::types::{
	CatalogEntry, NewEntry, RelocationRequest, RenameCounts, RenameEvent, RenameEventFilter,
};
use crate::events::SourceId;

/// Persistence operations the tracker needs from a catalog
///
/// Every mutating call is one atomic transaction: either all of its rows and
/// its audit record are written, or none are. Implementations must report a
/// missing row as [`CatalogError::EntryNotFound`](super::CatalogError::EntryNotFound)
/// so callers can tell it apart from transient failures.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
	/// Live row at `path` under `storage_root`
	async fn lookup_entry(&self, storage_root: &str, path: &str)
		-> CatalogResult<Option<CatalogEntry>>;

	/// Row by id, deleted or not
	async fn get_entry(&self, id: SourceId) -> CatalogResult<Option<CatalogEntry>>;

	/// Insert a row for a newly seen file, or refresh the live row already at
	/// that path
	async fn upsert_entry(&self, entry: &NewEntry) -> CatalogResult<CatalogEntry>;

	/// Update size and fingerprint of the live row at `path`, if any. A `None`
	/// keeps the value already stored.
	async fn refresh_entry(
		&self, storage_root: &str, path: &str, size: Option<u64>, quick_hash: Option<String>,
	) -> CatalogResult<Option<CatalogEntry>>;

	/// Rewrite the row (and for directories every descendant row) to its new
	/// location and record `event`. Returns the number of rows rewritten.
	async fn relocate(&self, request: &RelocationRequest, event: &RenameEvent) -> CatalogResult<u64>;

	/// Mark the row (and for directories its live descendants) deleted and
	/// record `event` when given. Returns the number of rows marked.
	async fn finalize_deletion(
		&self, source_id: SourceId, event: Option<&RenameEvent>,
	) -> CatalogResult<u64>;

	async fn record_rename_event(&self, event: &RenameEvent) -> CatalogResult<()>;

	/// Persisted rename events, newest first
	async fn rename_events(&self, filter: &RenameEventFilter) -> CatalogResult<Vec<RenameEvent>>;

	async fn rename_counts(&self) -> CatalogResult<RenameCounts>;

	/// Live rows strictly below `directory`
	async fn entries_under(
		&self, storage_root: &str, directory: &str,
	) -> CatalogResult<Vec<CatalogEntry>>;
}
