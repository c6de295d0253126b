//! Deciding whether a creation is the other half of a pending deletion

use super::pending::PendingMove;
use crate::events::{MatchMethod, ObservedEntry, SourceId};
use std::time::Duration;
use tokio::time::Instant;

/// Compare one pending deletion with a creation.
///
/// When both sides carry a fingerprint, size and fingerprint decide alone.
/// Otherwise the pair is a heuristic candidate: files must agree on size,
/// directories ignore size, and a `child_count` on both sides must agree.
pub fn compare(pending: &PendingMove, created: &ObservedEntry) -> Option<MatchMethod> {
	if let (Some(deleted_fp), Some(created_fp)) = (&pending.fingerprint, &created.fingerprint) {
		return (pending.size == created.size && deleted_fp == created_fp)
			.then_some(MatchMethod::Fingerprint);
	}

	if !pending.is_directory && pending.size != created.size {
		return None;
	}
	if let (Some(before), Some(after)) = (pending.child_count(), created.child_count()) {
		if before != after {
			return None;
		}
	}
	Some(MatchMethod::Heuristic)
}

/// Pick the deletion a creation most likely came from.
///
/// `candidates` must be oldest first. A fingerprint match wins over any
/// heuristic one; among equals the oldest wins.
pub fn select_candidate<'a>(
	candidates: impl IntoIterator<Item = &'a PendingMove>, created: &ObservedEntry, now: Instant,
	window: Duration, allow_heuristic: bool,
) -> Option<(SourceId, MatchMethod)> {
	let mut heuristic = None;

	for pending in candidates {
		if pending.is_expired(now, window) || pending.old_path == created.path {
			continue;
		}
		match compare(pending, created) {
			Some(MatchMethod::Fingerprint) => {
				return Some((pending.source_id, MatchMethod::Fingerprint));
			}
			Some(MatchMethod::Heuristic) if allow_heuristic && heuristic.is_none() => {
				heuristic = Some((pending.source_id, MatchMethod::Heuristic));
			}
			_ => {}
		}
	}

	heuristic
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::CHILD_COUNT_KEY;
	use crate::protocol::Protocol;

	fn pending_file(source_id: SourceId, path: &str, size: u64, fp: Option<&str>) -> PendingMove {
		let mut observed = ObservedEntry::file("r1", Protocol::Smb, path, size);
		observed.fingerprint = fp.map(str::to_string);
		PendingMove::new(source_id, observed)
	}

	#[tokio::test(start_paused = true)]
	async fn test_fingerprint_rule() {
		let pending = pending_file(1, "/a", 100, Some("abc"));
		let same = ObservedEntry::file("r1", Protocol::Smb, "/b", 100).with_fingerprint("abc");
		let other_hash = ObservedEntry::file("r1", Protocol::Smb, "/b", 100).with_fingerprint("def");
		let other_size = ObservedEntry::file("r1", Protocol::Smb, "/b", 101).with_fingerprint("abc");

		assert_eq!(compare(&pending, &same), Some(MatchMethod::Fingerprint));
		assert_eq!(compare(&pending, &other_hash), None);
		assert_eq!(compare(&pending, &other_size), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_heuristic_rule() {
		let pending = pending_file(1, "/a", 100, None);
		let created = ObservedEntry::file("r1", Protocol::Smb, "/b", 100).with_fingerprint("abc");
		assert_eq!(compare(&pending, &created), Some(MatchMethod::Heuristic));
		assert_eq!(compare(&pending, &created.clone().with_size(99)), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_directories_ignore_size_but_check_child_count() {
		let deleted = ObservedEntry::directory("r1", Protocol::Ftp, "/old")
			.with_size(4096)
			.with_metadata(CHILD_COUNT_KEY, 3);
		let pending = PendingMove::new(5, deleted);

		let created = ObservedEntry::directory("r1", Protocol::Ftp, "/new").with_size(0);
		assert_eq!(compare(&pending, &created), Some(MatchMethod::Heuristic));
		assert_eq!(
			compare(&pending, &created.clone().with_metadata(CHILD_COUNT_KEY, 3)),
			Some(MatchMethod::Heuristic)
		);
		assert_eq!(compare(&pending, &created.with_metadata(CHILD_COUNT_KEY, 4)), None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_fingerprint_preferred_over_older_heuristic() {
		let older = pending_file(1, "/old1", 100, None);
		let newer = pending_file(2, "/old2", 100, Some("abc"));
		let created = ObservedEntry::file("r1", Protocol::Smb, "/new", 100).with_fingerprint("abc");

		let selected =
			select_candidate([&older, &newer], &created, Instant::now(), Duration::from_secs(10), true);
		assert_eq!(selected, Some((2, MatchMethod::Fingerprint)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_skips_expired_and_same_path() {
		let stale = pending_file(1, "/a", 100, None);
		tokio::time::advance(Duration::from_secs(11)).await;
		let same_path = pending_file(2, "/new", 100, None);
		let fresh = pending_file(3, "/b", 100, None);
		let created = ObservedEntry::file("r1", Protocol::Smb, "/new", 100);

		let selected = select_candidate(
			[&stale, &same_path, &fresh],
			&created,
			Instant::now(),
			Duration::from_secs(10),
			true,
		);
		assert_eq!(selected, Some((3, MatchMethod::Heuristic)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_heuristics_can_be_disabled() {
		let pending = pending_file(1, "/a", 100, None);
		let created = ObservedEntry::file("r1", Protocol::Smb, "/b", 100);
		let selected =
			select_candidate([&pending], &created, Instant::now(), Duration::from_secs(10), false);
		assert_eq!(selected, None);
	}
}
