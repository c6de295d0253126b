// Correlation behavior through the public tracker API

use rename_tracker::{MatchMethod, ObservedEntry, Protocol, CHILD_COUNT_KEY};
use std::time::Duration;

mod common;
use common::*;

#[tokio::test(start_paused = true)]
async fn test_delete_then_create_within_window_matches() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(42, deleted_file("/movies/a.mkv", 4096, "h1"));
	tokio::time::advance(Duration::from_millis(1500)).await;

	let matched = tracker
		.detect_create(&deleted_file("/movies/b.mkv", 4096, "h1"))
		.expect("expected a match");
	assert_eq!(matched.source_id(), 42);
	assert_eq!(matched.old_path(), "/movies/a.mkv");
	assert_eq!(matched.new_path, "/movies/b.mkv");
	assert_eq!(matched.method, MatchMethod::Fingerprint);
	assert_eq!(tracker.engine().pending_count(), 0);
	assert_eq!(tracker.engine().in_flight_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_without_delete_does_not_match() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	assert!(tracker.detect_create(&deleted_file("/new.txt", 1, "h")).is_none());
	assert_eq!(tracker.engine().snapshot().counters.creations_checked, 1);
}

#[tokio::test(start_paused = true)]
async fn test_match_requires_same_root_and_protocol() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(1, deleted_file("/a.txt", 10, "h"));

	let other_root = ObservedEntry::file("r2", Protocol::Local, "/b.txt", 10).with_fingerprint("h");
	assert!(tracker.detect_create(&other_root).is_none());
	let other_protocol = ObservedEntry::file("r1", Protocol::Smb, "/b.txt", 10).with_fingerprint("h");
	assert!(tracker.detect_create(&other_protocol).is_none());

	assert!(tracker.detect_create(&deleted_file("/b.txt", 10, "h")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_fingerprint_mismatch_does_not_match() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(1, deleted_file("/a.txt", 10, "h1"));
	assert!(tracker.detect_create(&deleted_file("/b.txt", 10, "h2")).is_none());
	assert_eq!(tracker.engine().pending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oldest_directory_wins_without_fingerprints() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	for (source_id, path) in [(1, "/d1"), (2, "/d2"), (3, "/d3")] {
		tracker.track_delete(source_id, ObservedEntry::directory("r1", Protocol::Smb, path));
		tokio::time::advance(Duration::from_secs(1)).await;
	}

	let matched = tracker
		.detect_create(&ObservedEntry::directory("r1", Protocol::Smb, "/renamed"))
		.expect("expected a heuristic match");
	assert_eq!(matched.source_id(), 1);
	assert_eq!(matched.method, MatchMethod::Heuristic);
	assert_eq!(tracker.engine().snapshot().counters.heuristic_matches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_child_count_disagreement_blocks_directory_match() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(
		1,
		ObservedEntry::directory("r1", Protocol::Nfs, "/show").with_metadata(CHILD_COUNT_KEY, 3),
	);
	let different = ObservedEntry::directory("r1", Protocol::Nfs, "/other").with_metadata(CHILD_COUNT_KEY, 4);
	assert!(tracker.detect_create(&different).is_none());

	let same = ObservedEntry::directory("r1", Protocol::Nfs, "/tv/show").with_metadata(CHILD_COUNT_KEY, 3);
	assert_eq!(tracker.detect_create(&same).map(|m| m.source_id()), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_heuristics_disabled_by_config() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config().with_heuristic_matches(false));

	tracker.track_delete(1, ObservedEntry::file("r1", Protocol::Ftp, "/a.bin", 100));
	assert!(tracker
		.detect_create(&ObservedEntry::file("r1", Protocol::Ftp, "/b.bin", 100))
		.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_delete_keeps_one_entry() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(5, deleted_file("/a.txt", 10, "h"));
	let before = tracker.engine().snapshot();
	tracker.track_delete(5, deleted_file("/a.txt", 10, "h"));
	let after = tracker.engine().snapshot();

	assert_eq!(after.total_pending_moves, 1);
	assert_eq!(after.pending_by_protocol, before.pending_by_protocol);
	assert_eq!(after.pending_by_protocol.get(&Protocol::Local), Some(&1));
	assert_eq!(after.counters.deletions_replaced, 1);
}

#[tokio::test(start_paused = true)]
async fn test_window_is_protocol_specific() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	tracker.track_delete(1, deleted_file("/local.txt", 10, "l"));
	tracker.track_delete(2, ObservedEntry::file("r1", Protocol::Ftp, "/remote.txt", 10).with_fingerprint("f"));
	tokio::time::advance(Duration::from_secs(5)).await;

	// local (2 s) has lapsed, ftp (30 s) has not
	assert!(tracker.detect_create(&deleted_file("/local2.txt", 10, "l")).is_none());
	let remote = ObservedEntry::file("r1", Protocol::Ftp, "/remote2.txt", 10).with_fingerprint("f");
	assert_eq!(tracker.detect_create(&remote).map(|m| m.source_id()), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_match_exactly_once() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());
	tracker.track_delete(9, deleted_file("/a.txt", 10, "h"));

	let mut handles = Vec::new();
	for i in 0..16 {
		let tracker = tracker.clone();
		handles.push(tokio::spawn(async move {
			tracker.detect_create(&deleted_file(&format!("/copy-{i}.txt"), 10, "h")).is_some()
		}));
	}

	let mut matches = 0;
	for handle in handles {
		if handle.await.unwrap() {
			matches += 1;
		}
	}
	assert_eq!(matches, 1);
	assert_eq!(tracker.engine().snapshot().counters.total_matches(), 1);
}

#[test]
fn test_capabilities_lookup() {
	let (_dir, catalog) = open_catalog();
	let tracker = tracker(catalog, test_config());

	let ftp = tracker.capabilities("ftp").unwrap();
	assert!(ftp.requires_polling);
	assert_eq!(ftp.move_window, Duration::from_secs(30));
	assert!(tracker.capabilities("gopher").is_err());
	assert_eq!(tracker.poll_interval(Protocol::Local), None);
}
