//! Performance benchmarks for tether-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_engine::{
    fields, resolve, ChangeSet, ColumnSchema, ColumnType, Journal, Record, Schema, Store,
    StoreSnapshot, TableSchema,
};
use uuid::Uuid;

fn create_test_schema() -> Schema {
    Schema::new(1).with_table(TableSchema::new(
        "clients",
        vec![
            ColumnSchema::required("name", ColumnType::String),
            ColumnSchema::optional("phone", ColumnType::String),
            ColumnSchema::optional("balance", ColumnType::Number),
        ],
    ))
}

/// A store with `size` synced clients and `dirty` local edits on top.
fn populated_store(size: u64, dirty: u64) -> Store {
    let mut store = Store::new(create_test_schema());

    let mut pulled = ChangeSet::new();
    for i in 0..size {
        pulled.push_created(Record::new(
            Uuid::from_u128(i as u128),
            "clients",
            fields([("name", format!("Client {i}"))]),
            1000 + i,
        ));
    }
    store.merge_pulled(pulled, 1000 + size, 1000).unwrap();

    for i in 0..dirty {
        store
            .upsert(
                "clients",
                Uuid::from_u128(i as u128),
                fields([("name", format!("Edited {i}"))]),
                1000 + size,
            )
            .unwrap();
    }

    store
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("upsert", |b| {
        let mut store = Store::new(create_test_schema());
        let mut now = 1000u64;

        b.iter(|| {
            now += 1;
            store
                .upsert(
                    black_box("clients"),
                    Uuid::new_v4(),
                    fields([("name", "Test Client")]),
                    now,
                )
                .map(|r| r.updated_at)
        })
    });

    group.bench_function("get_record", |b| {
        let store = populated_store(1000, 0);
        let id = Uuid::from_u128(500);

        b.iter(|| store.get(black_box("clients"), black_box(&id)))
    });

    group.bench_function("scan_all", |b| {
        let store = populated_store(1000, 0);

        b.iter(|| store.scan("clients", |_| true).unwrap().count())
    });

    group.finish();
}

fn bench_journal(c: &mut Criterion) {
    let mut group = c.benchmark_group("journal");

    // 10 dirty rows among many: the index only visits what changed
    for size in [1_000u64, 10_000, 50_000] {
        let store = populated_store(size, 10);
        let since = Some(1000 + size);

        group.bench_with_input(BenchmarkId::new("full_scan", size), &store, |b, store| {
            let journal = Journal::new(usize::MAX);
            b.iter(|| journal.collect(black_box(store), since))
        });

        group.bench_with_input(BenchmarkId::new("index", size), &store, |b, store| {
            let journal = Journal::new(0);
            b.iter(|| journal.collect(black_box(store), since))
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10u64, 100, 500] {
        group.bench_with_input(BenchmarkId::new("merge_pulled", size), &size, |b, &size| {
            let base = populated_store(size, size / 2);

            let mut pulled = ChangeSet::new();
            // half the batch overlaps the local edits
            for i in size / 4..size / 4 + size / 2 {
                pulled.push_updated(Record::new(
                    Uuid::from_u128(i as u128),
                    "clients",
                    fields([("name", format!("Remote {i}"))]),
                    5000 + i,
                ));
            }

            b.iter(|| {
                let mut store = base.clone();
                store.merge_pulled(black_box(pulled.clone()), 6000, 6000)
            })
        });
    }

    group.bench_function("resolve", |b| {
        let id = Uuid::from_u128(1);
        let base = Record::new(id, "clients", fields([("name", "A")]), 100);
        let local = Record::new(id, "clients", fields([("name", "B")]), 200);
        let remote = Record::new(id, "clients", fields([("name", "C")]), 150);

        b.iter(|| resolve(black_box(Some(&base)), black_box(Some(&local)), black_box(&remote)))
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100u64, 500, 1000] {
        let store = populated_store(size, size / 10);

        group.bench_with_input(BenchmarkId::new("export", size), &store, |b, store| {
            b.iter(|| store.export_snapshot())
        });

        let json = store.export_snapshot().to_json().unwrap();
        group.bench_with_input(BenchmarkId::new("import", size), &json, |b, json| {
            b.iter(|| {
                let snapshot = StoreSnapshot::from_json(black_box(json)).unwrap();
                Store::from_snapshot(snapshot)
            })
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let changes = populated_store(100, 100);
    let changes = Journal::default().collect(&changes, None);

    group.bench_function("changeset_to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&changes)))
    });

    let json = serde_json::to_string(&changes).unwrap();
    group.bench_function("changeset_from_json", |b| {
        b.iter(|| serde_json::from_str::<ChangeSet>(black_box(&json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_journal,
    bench_merge,
    bench_snapshot,
    bench_serialization,
);
criterion_main!(benches);
