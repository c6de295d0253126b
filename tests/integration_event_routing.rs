// Change events routed through the tracker, including a polled root

use rename_tracker::change_source::ListedEntry;
use rename_tracker::{
	CatalogStore, ChangeKind, EventDisposition, FileChangeEvent, MoveOutcome, PollingChangeSource,
	Protocol, ProtocolMetadata, RenameStatus, CHILD_COUNT_KEY,
};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::*;

fn local_event(kind: ChangeKind, path: &str, size: Option<u64>, hash: Option<&str>) -> FileChangeEvent {
	FileChangeEvent::new(kind, "r1", Protocol::Local, path, false, size)
		.with_fingerprint(hash.map(str::to_string))
}

#[tokio::test(start_paused = true)]
async fn test_create_delete_create_becomes_a_move() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog.clone(), test_config());

	let created = tracker
		.handle_event(local_event(ChangeKind::Created, "/in/a.mkv", Some(10), Some("h")))
		.await
		.unwrap();
	let EventDisposition::Indexed { id } = created else {
		panic!("expected Indexed, got {created:?}");
	};

	// Deletions from the OS carry no size or fingerprint
	let deleted = tracker
		.handle_event(local_event(ChangeKind::Deleted, "/in/a.mkv", None, None))
		.await
		.unwrap();
	assert_eq!(deleted, EventDisposition::TrackedDelete { source_id: id });

	let moved = tracker
		.handle_event(local_event(ChangeKind::Created, "out\\a.mkv", Some(10), Some("h")))
		.await
		.unwrap();
	assert!(matches!(
		moved,
		EventDisposition::Moved { outcome: MoveOutcome::Relocated { rows_updated: 1 }, .. }
	));

	let row = catalog.get_entry(id).await.unwrap().unwrap();
	assert_eq!(row.path, "/out/a.mkv");
	assert_eq!(tracker.recent_rename_events(1).await.unwrap()[0].status, RenameStatus::Processed);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_delete_and_modify() {
	let (_dir, catalog) = open_catalog();
	let row = index_file(catalog.as_ref(), "/a.txt", 10, "h").await;
	let tracker = tracker(catalog.clone(), test_config());

	let unknown = tracker
		.handle_event(local_event(ChangeKind::Deleted, "/never.txt", None, None))
		.await
		.unwrap();
	assert_eq!(unknown, EventDisposition::UnknownDelete);
	assert_eq!(tracker.engine().pending_count(), 0);

	let modified = tracker
		.handle_event(local_event(ChangeKind::Modified, "/a.txt", Some(99), Some("h2")))
		.await
		.unwrap();
	assert_eq!(modified, EventDisposition::Refreshed { id: row.id });
	let stored = catalog.get_entry(row.id).await.unwrap().unwrap();
	assert_eq!(stored.size, 99);
	assert_eq!(stored.quick_hash.as_deref(), Some("h2"));

	let dir_modified = FileChangeEvent::new(ChangeKind::Modified, "r1", Protocol::Local, "/", true, None);
	assert_eq!(tracker.handle_event(dir_modified).await.unwrap(), EventDisposition::Ignored);
}

#[tokio::test(start_paused = true)]
async fn test_sizeless_modify_keeps_correlation_data() {
	let (_dir, catalog) = open_catalog();
	let row = index_file(catalog.as_ref(), "/a.txt", 1024, "abc").await;
	let tracker = tracker(catalog.clone(), test_config());

	let modified = tracker
		.handle_event(local_event(ChangeKind::Modified, "/a.txt", None, None))
		.await
		.unwrap();
	assert_eq!(modified, EventDisposition::Refreshed { id: row.id });
	let stored = catalog.get_entry(row.id).await.unwrap().unwrap();
	assert_eq!(stored.size, 1024);
	assert_eq!(stored.quick_hash.as_deref(), Some("abc"));

	tracker
		.handle_event(local_event(ChangeKind::Deleted, "/a.txt", None, None))
		.await
		.unwrap();
	let moved = tracker
		.handle_event(local_event(ChangeKind::Created, "/b.txt", Some(1024), Some("abc")))
		.await
		.unwrap();
	assert!(matches!(moved, EventDisposition::Moved { outcome: MoveOutcome::Relocated { .. }, .. }));
	assert_eq!(catalog.get_entry(row.id).await.unwrap().unwrap().path, "/b.txt");
}

#[tokio::test(start_paused = true)]
async fn test_directory_delete_uses_catalog_child_count() {
	let (_dir, catalog) = open_catalog();
	let show = index_dir(catalog.as_ref(), "/show").await;
	index_file(catalog.as_ref(), "/show/e1.mkv", 1, "1").await;
	index_file(catalog.as_ref(), "/show/e2.mkv", 2, "2").await;
	let tracker = tracker(catalog.clone(), test_config());

	tracker
		.handle_event(local_event(ChangeKind::Deleted, "/show", None, None))
		.await
		.unwrap();

	let mut wrong = ProtocolMetadata::new();
	wrong.insert(CHILD_COUNT_KEY.to_string(), 5.into());
	let mismatched = FileChangeEvent::new(ChangeKind::Created, "r1", Protocol::Local, "/elsewhere", true, None)
		.with_metadata(wrong);
	assert!(matches!(
		tracker.handle_event(mismatched).await.unwrap(),
		EventDisposition::Indexed { .. }
	));

	let mut right = ProtocolMetadata::new();
	right.insert(CHILD_COUNT_KEY.to_string(), 2.into());
	let matching = FileChangeEvent::new(ChangeKind::Created, "r1", Protocol::Local, "/tv/show", true, None)
		.with_metadata(right);
	assert!(matches!(
		tracker.handle_event(matching).await.unwrap(),
		EventDisposition::Moved { outcome: MoveOutcome::Relocated { rows_updated: 3 }, .. }
	));
	assert_eq!(catalog.get_entry(show.id).await.unwrap().unwrap().path, "/tv/show");
	assert!(catalog.lookup_entry("r1", "/tv/show/e2.mkv").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_indexes_the_new_path() {
	let (_dir, catalog) = open_catalog();
	let row = index_file(catalog.as_ref(), "/a.txt", 10, "h").await;
	let flaky = Arc::new(FlakyCatalog::new(catalog.clone(), 100));
	let tracker = tracker(flaky, test_config());

	tracker
		.handle_event(local_event(ChangeKind::Deleted, "/a.txt", None, None))
		.await
		.unwrap();
	let disposition = tracker
		.handle_event(local_event(ChangeKind::Created, "/b.txt", Some(10), Some("h")))
		.await
		.unwrap();
	assert!(matches!(
		disposition,
		EventDisposition::Moved { outcome: MoveOutcome::FellBackToDelete { .. }, .. }
	));

	assert!(catalog.get_entry(row.id).await.unwrap().unwrap().deleted);
	let replacement = catalog.lookup_entry("r1", "/b.txt").await.unwrap().unwrap();
	assert_ne!(replacement.id, row.id);
}

#[tokio::test(start_paused = true)]
async fn test_polled_root_rename_end_to_end() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog.clone(), test_config());

	let lister = SharedLister::new(vec![
		ListedEntry::directory("/movies"),
		ListedEntry::file("/movies/a.mkv", 4096).with_fingerprint("f1"),
	]);
	assert_eq!(tracker.index_root(&lister, "r1").await.unwrap(), 2);
	let original = catalog.lookup_entry("r1", "/movies/a.mkv").await.unwrap().unwrap();

	let source = PollingChangeSource::from_registry(
		"r1",
		Protocol::Smb,
		tracker.engine().registry(),
		lister.clone(),
	);
	tracker.start().unwrap();
	tracker.watch(Arc::new(source)).unwrap();

	// let the source take its baseline listing
	tokio::time::sleep(Duration::from_millis(10)).await;
	lister.replace(vec![
		ListedEntry::directory("/movies"),
		ListedEntry::file("/movies/b.mkv", 4096).with_fingerprint("f1"),
	]);
	tokio::time::sleep(Duration::from_secs(3)).await;

	let renamed = catalog.lookup_entry("r1", "/movies/b.mkv").await.unwrap().unwrap();
	assert_eq!(renamed.id, original.id);
	assert!(catalog.lookup_entry("r1", "/movies/a.mkv").await.unwrap().is_none());

	let events = tracker.recent_rename_events(5).await.unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].protocol, Protocol::Smb);
	assert_eq!(events[0].status, RenameStatus::Processed);

	assert_eq!(tracker.stop().await, 0);
}
