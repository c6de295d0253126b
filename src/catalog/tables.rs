//! Table definitions for the redb catalog
//!
//! All table definitions live here so the schema can be read in one place.

use super::error::CatalogResult;
use super::types::RenameStatus;
use crate::protocol::Protocol;
use redb::{Database, ReadableTable, Table, TableDefinition};

/// Catalog rows (entry id -> bincode CatalogEntry)
pub const ENTRIES_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("entries");

/// Live-row path index (`<storage_root>\0<path>` -> entry id). Deleted rows are
/// removed from the index but stay in `ENTRIES_TABLE`.
pub const PATH_INDEX_TABLE: TableDefinition<&str, i64> = TableDefinition::new("path_index");

/// Rename audit log (append sequence -> bincode RenameEvent)
pub const RENAME_EVENTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("rename_events");

/// Counters
///
/// Key format:
///   - "entry_sequence"                   => next entry id
///   - "rename_sequence"                  => next rename event sequence
///   - "status:<status>"                  => matched rename events per status
///   - "protocol:<protocol>:<status>"     => matched rename events per protocol and status
///   - "unmatched:<protocol>"             => expired deletions that never matched
///
/// Counters are updated in the same transaction as the mutation they count.
pub const STATS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("stats");

pub const ENTRY_SEQUENCE_KEY: &str = "entry_sequence";
pub const RENAME_SEQUENCE_KEY: &str = "rename_sequence";

/// Schema version for migration tracking
pub const SCHEMA_VERSION: u32 = 1;

pub fn status_key(status: RenameStatus) -> String {
	format!("status:{}", status.as_str())
}

pub fn protocol_status_key(protocol: Protocol, status: RenameStatus) -> String {
	format!("protocol:{}:{}", protocol.as_str(), status.as_str())
}

pub fn unmatched_key(protocol: Protocol) -> String {
	format!("unmatched:{}", protocol.as_str())
}

/// Path index key for one row
pub fn path_key(storage_root: &str, path: &str) -> String {
	format!("{storage_root}\0{path}")
}

/// Half-open key range covering every indexed path strictly below `directory`
pub fn descendant_range(storage_root: &str, directory: &str) -> (String, String) {
	let lower = if directory == "/" {
		path_key(storage_root, "/")
	} else {
		path_key(storage_root, &format!("{directory}/"))
	};
	// '0' is the byte after '/'
	let mut upper = lower.clone();
	upper.pop();
	upper.push('0');
	(lower, upper)
}

/// Read a counter, 0 when absent
pub fn read_counter(stats: &impl ReadableTable<&'static str, u64>, key: &str) -> CatalogResult<u64> {
	Ok(stats.get(key)?.map(|value| value.value()).unwrap_or(0))
}

/// Add `delta` to a counter and return the new value
pub fn bump_counter(
	stats: &mut Table<'_, &'static str, u64>, key: &str, delta: u64,
) -> CatalogResult<u64> {
	let next = read_counter(&*stats, key)?.saturating_add(delta);
	stats.insert(key, next)?;
	Ok(next)
}

/// Create every table so read transactions never hit a missing table
pub fn initialize_tables(database: &Database) -> CatalogResult<()> {
	let write_txn = database.begin_write()?;
	{
		let _entries = write_txn.open_table(ENTRIES_TABLE)?;
		let _path_index = write_txn.open_table(PATH_INDEX_TABLE)?;
		let _rename_events = write_txn.open_table(RENAME_EVENTS_TABLE)?;
		let _stats = write_txn.open_table(STATS_TABLE)?;
	}
	write_txn.commit()?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_descendant_range_bounds() {
		let (lower, upper) = descendant_range("r1", "/movies");
		assert_eq!(lower, "r1\0/movies/");
		assert_eq!(upper, "r1\0/movies0");

		let inside = path_key("r1", "/movies/a.mkv");
		let sibling = path_key("r1", "/movies2/a.mkv");
		let itself = path_key("r1", "/movies");
		assert!(lower <= inside && inside < upper);
		assert!(!(lower <= sibling && sibling < upper));
		assert!(!(lower <= itself && itself < upper));
	}

	#[test]
	fn test_descendant_range_of_root() {
		let (lower, upper) = descendant_range("r1", "/");
		let inside = path_key("r1", "/a");
		let other_root = path_key("r2", "/a");
		assert!(lower <= inside && inside < upper);
		assert!(!(lower <= other_root && other_root < upper));
	}
}
