//! Common test utilities for the rename-tracker integration tests

#![allow(dead_code)]

use rename_tracker::catalog::{
	CatalogEntry, CatalogResult, NewEntry, RelocationRequest, RenameCounts, RenameEventFilter,
};
use rename_tracker::change_source::{DirectoryLister, ListedEntry};
use rename_tracker::{
	CatalogConfig, CatalogError, CatalogStore, ErrorRecoveryConfig, ObservedEntry, Protocol,
	RedbCatalog, RenameEvent, RenameTracker, SourceId, TrackerConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Open a catalog in a fresh temp directory. Keep the `TempDir` alive for the
/// duration of the test.
pub fn open_catalog() -> (TempDir, Arc<RedbCatalog>) {
	let temp_dir = TempDir::new().expect("Failed to create temp directory");
	let config = CatalogConfig::with_path(temp_dir.path().join("catalog.redb"));
	let catalog = RedbCatalog::open(config).expect("Failed to open catalog");
	(temp_dir, Arc::new(catalog))
}

/// Retry policy that gives up quickly
pub fn fast_retry() -> ErrorRecoveryConfig {
	ErrorRecoveryConfig {
		max_retries: 2,
		initial_retry_delay: Duration::from_millis(10),
		max_retry_delay: Duration::from_millis(50),
		..ErrorRecoveryConfig::default()
	}
}

pub fn test_config() -> TrackerConfig {
	TrackerConfig::default().with_retry(fast_retry())
}

pub fn tracker(catalog: Arc<dyn CatalogStore>, config: TrackerConfig) -> Arc<RenameTracker> {
	Arc::new(RenameTracker::new(catalog, config).expect("Failed to build tracker"))
}

pub async fn index_file(catalog: &dyn CatalogStore, path: &str, size: u64, hash: &str) -> CatalogEntry {
	catalog
		.upsert_entry(&NewEntry::file("r1", path, size, Some(hash.to_string())))
		.await
		.expect("index file")
}

pub async fn index_dir(catalog: &dyn CatalogStore, path: &str) -> CatalogEntry {
	catalog.upsert_entry(&NewEntry::directory("r1", path)).await.expect("index directory")
}

/// The deleted side of a local file move, as the router would build it
pub fn deleted_file(path: &str, size: u64, hash: &str) -> ObservedEntry {
	ObservedEntry::file("r1", Protocol::Local, path, size).with_fingerprint(hash)
}

/// Catalog whose `relocate` fails with a retryable error a set number of
/// times before delegating
pub struct FlakyCatalog {
	inner: Arc<RedbCatalog>,
	relocate_failures: AtomicU32,
	relocate_calls: AtomicU32,
}

impl FlakyCatalog {
	pub fn new(inner: Arc<RedbCatalog>, relocate_failures: u32) -> Self {
		Self {
			inner,
			relocate_failures: AtomicU32::new(relocate_failures),
			relocate_calls: AtomicU32::new(0),
		}
	}

	pub fn relocate_calls(&self) -> u32 {
		self.relocate_calls.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl CatalogStore for FlakyCatalog {
	async fn lookup_entry(
		&self, storage_root: &str, path: &str,
	) -> CatalogResult<Option<CatalogEntry>> {
		self.inner.lookup_entry(storage_root, path).await
	}

	async fn get_entry(&self, id: SourceId) -> CatalogResult<Option<CatalogEntry>> {
		self.inner.get_entry(id).await
	}

	async fn upsert_entry(&self, entry: &NewEntry) -> CatalogResult<CatalogEntry> {
		self.inner.upsert_entry(entry).await
	}

	async fn refresh_entry(
		&self, storage_root: &str, path: &str, size: Option<u64>, quick_hash: Option<String>,
	) -> CatalogResult<Option<CatalogEntry>> {
		self.inner.refresh_entry(storage_root, path, size, quick_hash).await
	}

	async fn relocate(&self, request: &RelocationRequest, event: &RenameEvent) -> CatalogResult<u64> {
		self.relocate_calls.fetch_add(1, Ordering::SeqCst);
		let failed = self
			.relocate_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok();
		if failed {
			return Err(CatalogError::TransactionError("simulated write conflict".to_string()));
		}
		self.inner.relocate(request, event).await
	}

	async fn finalize_deletion(
		&self, source_id: SourceId, event: Option<&RenameEvent>,
	) -> CatalogResult<u64> {
		self.inner.finalize_deletion(source_id, event).await
	}

	async fn record_rename_event(&self, event: &RenameEvent) -> CatalogResult<()> {
		self.inner.record_rename_event(event).await
	}

	async fn rename_events(&self, filter: &RenameEventFilter) -> CatalogResult<Vec<RenameEvent>> {
		self.inner.rename_events(filter).await
	}

	async fn rename_counts(&self) -> CatalogResult<RenameCounts> {
		self.inner.rename_counts().await
	}

	async fn entries_under(
		&self, storage_root: &str, directory: &str,
	) -> CatalogResult<Vec<CatalogEntry>> {
		self.inner.entries_under(storage_root, directory).await
	}
}

/// In-memory listing standing in for a remote share
#[derive(Clone, Default)]
pub struct SharedLister {
	entries: Arc<Mutex<Vec<ListedEntry>>>,
}

impl SharedLister {
	pub fn new(entries: Vec<ListedEntry>) -> Self {
		Self { entries: Arc::new(Mutex::new(entries)) }
	}

	pub fn replace(&self, entries: Vec<ListedEntry>) {
		*self.entries.lock().unwrap() = entries;
	}
}

#[async_trait::async_trait]
impl DirectoryLister for SharedLister {
	async fn list(&self) -> rename_tracker::Result<Vec<ListedEntry>> {
		Ok(self.entries.lock().unwrap().clone())
	}
}
