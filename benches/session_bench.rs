//! Benchmarks for the session layer
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use photon_session::session::{
    AuthPatch, PersistedRecord, SeenPosts, SeenPostsMap, SessionPatch, UserSessionData,
};
use photon_session::storage::{KeyValueStore, MemoryStore, SqliteStore};
use std::sync::Arc;
use tempfile::tempdir;

fn external_seen(count: usize, offset: usize) -> SeenPostsMap {
    (0..count)
        .map(|i| (format!("t3_{:x}", i + offset), i as i64))
        .collect()
}

fn bench_seen_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("seen_merge");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("half_overlap_{}", size), |b| {
            b.iter_batched(
                || {
                    let seen = SeenPosts::new(Arc::new(MemoryStore::new()));
                    seen.merge_external(external_seen(size, 0));
                    (seen, external_seen(size, size / 2))
                },
                |(seen, external)| black_box(seen.merge_external(external)),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_record_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("record_update");

    group.bench_function("memory", |b| {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let record: PersistedRecord<UserSessionData> = PersistedRecord::new(store, "u/bench");
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            let patch = SessionPatch::new().auth(AuthPatch::new().access_token(n.to_string()));
            rt.block_on(record.update(|data| patch.apply(data))).unwrap()
        });
    });

    group.bench_function("sqlite", |b| {
        let dir = tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteStore::open_path(&dir.path().join("bench.db")).unwrap());
        let record: PersistedRecord<UserSessionData> = PersistedRecord::new(store, "u/bench");
        let mut n = 0u64;

        b.iter(|| {
            n += 1;
            let patch = SessionPatch::new().auth(AuthPatch::new().access_token(n.to_string()));
            rt.block_on(record.update(|data| patch.apply(data))).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_seen_merge, bench_record_update);
criterion_main!(benches);
