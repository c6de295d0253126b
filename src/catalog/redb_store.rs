//! redb-backed catalog

use super::config::CatalogConfig;
use super::error::{CatalogError, CatalogResult};
use super::path_utils::{file_name, is_descendant, normalize_path, parent_path, rebase};
use super::store::CatalogStore;
use super::tables::{
	bump_counter, descendant_range, initialize_tables, path_key, protocol_status_key, read_counter,
	status_key, unmatched_key, ENTRIES_TABLE, ENTRY_SEQUENCE_KEY, PATH_INDEX_TABLE,
	RENAME_EVENTS_TABLE, RENAME_SEQUENCE_KEY, STATS_TABLE,
};
use super::types::{
	CatalogEntry, NewEntry, RelocationRequest, RenameCounts, RenameEvent, RenameEventFilter,
	RenameStatus,
};
use crate::events::SourceId;
use crate::protocol::Protocol;
use chrono::Utc;
use redb::{Builder, Database, ReadableTable, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

type EntriesTable<'txn> = Table<'txn, i64, &'static [u8]>;
type PathIndexTable<'txn> = Table<'txn, &'static str, i64>;
type EventsTable<'txn> = Table<'txn, u64, &'static [u8]>;
type StatsTable<'txn> = Table<'txn, &'static str, u64>;

/// Catalog stored in a single redb file
pub struct RedbCatalog {
	database: Arc<Database>,
	config: CatalogConfig,
}

impl RedbCatalog {
	/// Open (or create) the catalog file and make sure every table exists
	pub fn open(config: CatalogConfig) -> CatalogResult<Self> {
		config.validate().map_err(CatalogError::InvalidConfiguration)?;

		let mut builder = Builder::new();
		if let Some(bytes) = config.cache_size_bytes {
			builder.set_cache_size(bytes);
		}
		let database = builder.create(&config.database_path)?;
		initialize_tables(&database)?;

		info!(path = %config.database_path.display(), "Opened catalog");
		Ok(Self { database: Arc::new(database), config })
	}

	pub fn config(&self) -> &CatalogConfig {
		&self.config
	}
}

fn encode<T: Serialize>(value: &T) -> CatalogResult<Vec<u8>> {
	bincode::serialize(value).map_err(|e| CatalogError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CatalogResult<T> {
	bincode::deserialize(bytes).map_err(|e| CatalogError::Deserialization(e.to_string()))
}

fn load_entry(
	entries: &impl ReadableTable<i64, &'static [u8]>, id: SourceId,
) -> CatalogResult<Option<CatalogEntry>> {
	match entries.get(id)? {
		Some(bytes) => Ok(Some(decode(bytes.value())?)),
		None => Ok(None),
	}
}

fn store_entry(entries: &mut EntriesTable<'_>, entry: &CatalogEntry) -> CatalogResult<()> {
	let bytes = encode(entry)?;
	entries.insert(entry.id, bytes.as_slice())?;
	Ok(())
}

fn indexed_id(
	path_index: &impl ReadableTable<&'static str, i64>, storage_root: &str, path: &str,
) -> CatalogResult<Option<SourceId>> {
	Ok(path_index.get(path_key(storage_root, path).as_str())?.map(|id| id.value()))
}

/// Index keys and ids of every live row strictly below `directory`
fn indexed_descendants(
	path_index: &impl ReadableTable<&'static str, i64>, storage_root: &str, directory: &str,
) -> CatalogResult<Vec<(String, SourceId)>> {
	let (lower, upper) = descendant_range(storage_root, directory);
	let rows = path_index
		.range(lower.as_str()..upper.as_str())?
		.map(|item| item.map(|(key, id)| (key.value().to_string(), id.value())))
		.collect::<Result<Vec<_>, redb::StorageError>>()?;
	Ok(rows)
}

fn append_rename_event(
	events: &mut EventsTable<'_>, stats: &mut StatsTable<'_>, event: &RenameEvent,
) -> CatalogResult<()> {
	let sequence = bump_counter(stats, RENAME_SEQUENCE_KEY, 1)?;
	let bytes = encode(event)?;
	events.insert(sequence, bytes.as_slice())?;
	if event.match_method.is_none() {
		bump_counter(stats, &unmatched_key(event.protocol), 1)?;
	} else {
		bump_counter(stats, &status_key(event.status), 1)?;
		bump_counter(stats, &protocol_status_key(event.protocol, event.status), 1)?;
	}
	Ok(())
}

fn mark_deleted(
	entries: &mut EntriesTable<'_>, path_index: &mut PathIndexTable<'_>, mut entry: CatalogEntry,
) -> CatalogResult<()> {
	let key = path_key(&entry.storage_root, &entry.path);
	let indexed = path_index.get(key.as_str())?.map(|id| id.value());
	if indexed == Some(entry.id) {
		path_index.remove(key.as_str())?;
	}
	let now = Utc::now();
	entry.deleted = true;
	entry.deleted_at = Some(now);
	entry.last_scan_at = now;
	store_entry(entries, &entry)
}

/// Soft-delete a live row and, for a directory, every live row below it.
/// Returns the number of rows marked.
fn mark_subtree_deleted(
	entries: &mut EntriesTable<'_>, path_index: &mut PathIndexTable<'_>, entry: CatalogEntry,
) -> CatalogResult<u64> {
	let descendants = if entry.is_directory {
		indexed_descendants(&*path_index, &entry.storage_root, &entry.path)?
	} else {
		Vec::new()
	};
	mark_deleted(entries, path_index, entry)?;
	let mut rows_marked = 1u64;

	for (_, id) in descendants {
		if let Some(child) = load_entry(&*entries, id)? {
			mark_deleted(entries, path_index, child)?;
			rows_marked += 1;
		}
	}
	Ok(rows_marked)
}

impl RedbCatalog {
	fn relocate_in_txn(&self, request: &RelocationRequest, event: &RenameEvent) -> CatalogResult<u64> {
		let storage_root = request.storage_root.as_str();
		let new_path = normalize_path(&request.new_path);
		let write_txn = self.database.begin_write()?;
		let (rows_updated, replaced) = {
			let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
			let mut path_index = write_txn.open_table(PATH_INDEX_TABLE)?;
			let mut events = write_txn.open_table(RENAME_EVENTS_TABLE)?;
			let mut stats = write_txn.open_table(STATS_TABLE)?;

			let mut entry = load_entry(&entries, request.source_id)?
				.filter(|entry| !entry.deleted && entry.storage_root == storage_root)
				.ok_or_else(|| CatalogError::EntryNotFound(request.source_id.to_string()))?;

			// A rename over a live path replaces what was there, unless that
			// would delete the entry being moved
			let mut replaced = 0u64;
			if let Some(existing_id) = indexed_id(&path_index, storage_root, &new_path)? {
				if existing_id != entry.id {
					if is_descendant(&entry.path, &new_path) {
						return Err(CatalogError::PathConflict { path: new_path, existing_id });
					}
					if let Some(existing) = load_entry(&entries, existing_id)? {
						replaced = mark_subtree_deleted(&mut entries, &mut path_index, existing)?;
					}
				}
			}

			let old_path = entry.path.clone();
			let descendants = if entry.is_directory {
				indexed_descendants(&path_index, storage_root, &old_path)?
			} else {
				Vec::new()
			};

			let now = Utc::now();
			path_index.remove(path_key(storage_root, &old_path).as_str())?;
			entry.parent_id = match parent_path(&new_path) {
				Some(parent) => indexed_id(&path_index, storage_root, parent)?,
				None => None,
			};
			entry.name = file_name(&new_path).to_string();
			entry.path = new_path.clone();
			entry.modified_at = now;
			entry.last_scan_at = now;
			store_entry(&mut entries, &entry)?;
			path_index.insert(path_key(storage_root, &new_path).as_str(), entry.id)?;
			let mut rows_updated = 1u64;

			for (key, id) in descendants {
				path_index.remove(key.as_str())?;
				let mut child = load_entry(&entries, id)?.ok_or_else(|| {
					CatalogError::CorruptionError(format!("path index points at missing entry {id}"))
				})?;
				let child_path = rebase(&child.path, &old_path, &new_path).ok_or_else(|| {
					CatalogError::CorruptionError(format!(
						"entry {id} at {} is indexed below {old_path}",
						child.path
					))
				})?;
				if let Some(existing_id) = indexed_id(&path_index, storage_root, &child_path)? {
					if existing_id != id {
						return Err(CatalogError::PathConflict { path: child_path, existing_id });
					}
				}
				child.name = file_name(&child_path).to_string();
				child.path = child_path;
				child.last_scan_at = now;
				store_entry(&mut entries, &child)?;
				path_index.insert(path_key(storage_root, &child.path).as_str(), id)?;
				rows_updated += 1;
			}

			append_rename_event(&mut events, &mut stats, event)?;
			(rows_updated, replaced)
		};
		write_txn.commit()?;

		debug!(
			source_id = request.source_id,
			from = %request.old_path,
			to = %new_path,
			rows_updated,
			replaced,
			"Relocated catalog entry"
		);
		Ok(rows_updated)
	}

	fn finalize_deletion_in_txn(
		&self, source_id: SourceId, event: Option<&RenameEvent>,
	) -> CatalogResult<u64> {
		let write_txn = self.database.begin_write()?;
		let rows_marked = {
			let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
			let mut path_index = write_txn.open_table(PATH_INDEX_TABLE)?;
			let mut events = write_txn.open_table(RENAME_EVENTS_TABLE)?;
			let mut stats = write_txn.open_table(STATS_TABLE)?;

			let rows_marked = match load_entry(&entries, source_id)?.filter(|entry| !entry.deleted) {
				Some(entry) => mark_subtree_deleted(&mut entries, &mut path_index, entry)?,
				None => 0,
			};

			if let Some(event) = event {
				append_rename_event(&mut events, &mut stats, event)?;
			}
			rows_marked
		};
		write_txn.commit()?;
		Ok(rows_marked)
	}

	fn upsert_in_txn(&self, new_entry: &NewEntry) -> CatalogResult<CatalogEntry> {
		let storage_root = new_entry.storage_root.as_str();
		let path = normalize_path(&new_entry.path);
		let write_txn = self.database.begin_write()?;
		let entry = {
			let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
			let mut path_index = write_txn.open_table(PATH_INDEX_TABLE)?;
			let mut stats = write_txn.open_table(STATS_TABLE)?;
			let now = Utc::now();

			let existing = match indexed_id(&path_index, storage_root, &path)? {
				Some(id) => load_entry(&entries, id)?,
				None => None,
			};

			let entry = match existing {
				Some(mut entry) => {
					entry.is_directory = new_entry.is_directory;
					entry.size = new_entry.size;
					entry.quick_hash = new_entry.quick_hash.clone();
					entry.modified_at = now;
					entry.last_scan_at = now;
					entry
				}
				None => {
					let id = bump_counter(&mut stats, ENTRY_SEQUENCE_KEY, 1)? as SourceId;
					let parent_id = match parent_path(&path) {
						Some(parent) => indexed_id(&path_index, storage_root, parent)?,
						None => None,
					};
					CatalogEntry {
						id,
						storage_root: storage_root.to_string(),
						name: file_name(&path).to_string(),
						path: path.clone(),
						parent_id,
						is_directory: new_entry.is_directory,
						size: new_entry.size,
						quick_hash: new_entry.quick_hash.clone(),
						deleted: false,
						deleted_at: None,
						modified_at: now,
						last_scan_at: now,
					}
				}
			};

			store_entry(&mut entries, &entry)?;
			path_index.insert(path_key(storage_root, &path).as_str(), entry.id)?;
			entry
		};
		write_txn.commit()?;
		Ok(entry)
	}

	fn refresh_in_txn(
		&self, storage_root: &str, path: &str, size: Option<u64>, quick_hash: Option<String>,
	) -> CatalogResult<Option<CatalogEntry>> {
		let path = normalize_path(path);
		let write_txn = self.database.begin_write()?;
		let refreshed = {
			let mut entries = write_txn.open_table(ENTRIES_TABLE)?;
			let path_index = write_txn.open_table(PATH_INDEX_TABLE)?;

			let existing = match indexed_id(&path_index, storage_root, &path)? {
				Some(id) => load_entry(&entries, id)?,
				None => None,
			};
			match existing {
				Some(mut entry) => {
					let now = Utc::now();
					if let Some(size) = size {
						entry.size = size;
					}
					if quick_hash.is_some() {
						entry.quick_hash = quick_hash;
					}
					entry.modified_at = now;
					entry.last_scan_at = now;
					store_entry(&mut entries, &entry)?;
					Some(entry)
				}
				None => None,
			}
		};
		write_txn.commit()?;
		Ok(refreshed)
	}
}

#[async_trait::async_trait]
impl CatalogStore for RedbCatalog {
	async fn lookup_entry(
		&self, storage_root: &str, path: &str,
	) -> CatalogResult<Option<CatalogEntry>> {
		let read_txn = self.database.begin_read()?;
		let entries = read_txn.open_table(ENTRIES_TABLE)?;
		let path_index = read_txn.open_table(PATH_INDEX_TABLE)?;
		match indexed_id(&path_index, storage_root, &normalize_path(path))? {
			Some(id) => load_entry(&entries, id),
			None => Ok(None),
		}
	}

	async fn get_entry(&self, id: SourceId) -> CatalogResult<Option<CatalogEntry>> {
		let read_txn = self.database.begin_read()?;
		let entries = read_txn.open_table(ENTRIES_TABLE)?;
		load_entry(&entries, id)
	}

	async fn upsert_entry(&self, entry: &NewEntry) -> CatalogResult<CatalogEntry> {
		self.upsert_in_txn(entry)
	}

	async fn refresh_entry(
		&self, storage_root: &str, path: &str, size: Option<u64>, quick_hash: Option<String>,
	) -> CatalogResult<Option<CatalogEntry>> {
		self.refresh_in_txn(storage_root, path, size, quick_hash)
	}

	async fn relocate(&self, request: &RelocationRequest, event: &RenameEvent) -> CatalogResult<u64> {
		self.relocate_in_txn(request, event)
	}

	async fn finalize_deletion(
		&self, source_id: SourceId, event: Option<&RenameEvent>,
	) -> CatalogResult<u64> {
		self.finalize_deletion_in_txn(source_id, event)
	}

	async fn record_rename_event(&self, event: &RenameEvent) -> CatalogResult<()> {
		let write_txn = self.database.begin_write()?;
		{
			let mut events = write_txn.open_table(RENAME_EVENTS_TABLE)?;
			let mut stats = write_txn.open_table(STATS_TABLE)?;
			append_rename_event(&mut events, &mut stats, event)?;
		}
		write_txn.commit()?;
		Ok(())
	}

	async fn rename_events(&self, filter: &RenameEventFilter) -> CatalogResult<Vec<RenameEvent>> {
		let read_txn = self.database.begin_read()?;
		let events = read_txn.open_table(RENAME_EVENTS_TABLE)?;
		let limit = filter.limit.unwrap_or(usize::MAX);

		let mut matched = Vec::new();
		for item in events.iter()?.rev() {
			if matched.len() >= limit {
				break;
			}
			let (_, bytes) = item?;
			let event: RenameEvent = decode(bytes.value())?;
			if filter.matches(&event) {
				matched.push(event);
			}
		}
		Ok(matched)
	}

	async fn rename_counts(&self) -> CatalogResult<RenameCounts> {
		let read_txn = self.database.begin_read()?;
		let stats = read_txn.open_table(STATS_TABLE)?;

		let mut counts = RenameCounts::default();
		for status in RenameStatus::ALL {
			let count = read_counter(&stats, &status_key(status))?;
			if count > 0 {
				counts.by_status.insert(status, count);
			}
			for protocol in Protocol::ALL {
				let count = read_counter(&stats, &protocol_status_key(protocol, status))?;
				if count > 0 {
					counts.by_protocol.entry(protocol).or_default().insert(status, count);
				}
			}
		}
		for protocol in Protocol::ALL {
			let count = read_counter(&stats, &unmatched_key(protocol))?;
			if count > 0 {
				counts.unmatched_by_protocol.insert(protocol, count);
			}
		}
		Ok(counts)
	}

	async fn entries_under(
		&self, storage_root: &str, directory: &str,
	) -> CatalogResult<Vec<CatalogEntry>> {
		let read_txn = self.database.begin_read()?;
		let entries = read_txn.open_table(ENTRIES_TABLE)?;
		let path_index = read_txn.open_table(PATH_INDEX_TABLE)?;

		let mut rows = Vec::new();
		for (_, id) in indexed_descendants(&path_index, storage_root, &normalize_path(directory))? {
			if let Some(entry) = load_entry(&entries, id)? {
				rows.push(entry);
			}
		}
		Ok(rows)
	}
}
