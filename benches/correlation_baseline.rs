use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rename_tracker::{
	CatalogConfig, CatalogStore, CorrelationEngine, NewEntry, ObservedEntry, Protocol, RedbCatalog,
	RenameTracker, TrackerConfig,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn engine() -> CorrelationEngine {
	let config = TrackerConfig::default();
	let registry = Arc::new(config.registry());
	CorrelationEngine::new(config, registry)
}

fn file(path: String, size: u64) -> ObservedEntry {
	ObservedEntry::file("r1", Protocol::Smb, &path, size).with_fingerprint(format!("fp-{size}"))
}

fn bench_track_and_match(c: &mut Criterion) {
	c.bench_function("track_then_match_1000", |b| {
		b.iter(|| {
			let engine = engine();
			for i in 0..1000u64 {
				engine.track_delete(i as i64, file(format!("/old/{i}.mkv"), i));
			}
			for i in 0..1000u64 {
				black_box(engine.detect_create(&file(format!("/new/{i}.mkv"), i)));
			}
		})
	});
}

fn bench_miss_against_full_bucket(c: &mut Criterion) {
	let engine = engine();
	for i in 0..10_000u64 {
		engine.track_delete(i as i64, file(format!("/old/{i}.mkv"), i));
	}

	c.bench_function("detect_miss_10000_pending", |b| {
		b.iter(|| black_box(engine.detect_create(&file("/new/none.mkv".to_string(), u64::MAX))))
	});
}

fn bench_directory_relocation(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();

	c.bench_function("relocate_directory_100_children", |b| {
		b.iter(|| {
			rt.block_on(async {
				let temp_dir = TempDir::new().unwrap();
				let catalog = Arc::new(
					RedbCatalog::open(CatalogConfig::with_path(temp_dir.path().join("bench.redb")))
						.unwrap(),
				);
				let show = catalog.upsert_entry(&NewEntry::directory("r1", "/show")).await.unwrap();
				for i in 0..100 {
					catalog
						.upsert_entry(&NewEntry::file("r1", &format!("/show/{i}.mkv"), i, None))
						.await
						.unwrap();
				}

				let tracker = RenameTracker::new(catalog, TrackerConfig::default()).unwrap();
				tracker.track_delete(show.id, ObservedEntry::directory("r1", Protocol::Local, "/show"));
				let matched = tracker
					.detect_create(&ObservedEntry::directory("r1", Protocol::Local, "/tv/show"))
					.unwrap();
				black_box(tracker.process_move(&matched, "/tv/show").await.unwrap());
			})
		})
	});
}

criterion_group!(
	benches,
	bench_track_and_match,
	bench_miss_against_full_bucket,
	bench_directory_relocation
);
criterion_main!(benches);
