//! Benchmark suite for the happy driver
//!
//! Covers:
//! - Mutations: add, link (memtable only and across freezes)
//! - Lookups: node from the memtable, from segments, misses
//! - Codec: locality ordering and nodetable encoding of one snapshot
//!
//! Run: cargo bench --bench graph_operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use graphie::happy::writer::locality_order;
use graphie::happy::{Memtable, NodeRecord, NodetableWriter};
use graphie::{attrs, GraphStorage, HappyConfig, HappyStorage, NodeId};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(threshold: usize) -> HappyConfig {
    HappyConfig {
        persist_threshold: threshold,
        bloom_bits: 1 << 20,
        ..HappyConfig::default()
    }
}

/// Chain of `node_count` nodes plus a second edge every 10 nodes.
fn create_test_graph(node_count: u64, threshold: usize) -> (TempDir, HappyStorage) {
    let dir = TempDir::new().unwrap();
    let storage = HappyStorage::open(dir.path(), config(threshold)).unwrap();
    for i in 0..node_count {
        storage
            .add(&["FUNCTION"], attrs! { "name" => format!("func_{}", i) })
            .unwrap();
    }
    for id in 1..node_count {
        storage.link(id, id + 1, attrs! { "type" => "CALLS" }).unwrap();
        if id % 10 == 0 && id + 10 <= node_count {
            storage.link(id, id + 10, attrs! { "type" => "IMPORTS" }).unwrap();
        }
    }
    (dir, storage)
}

fn create_memtable(node_count: u64) -> Memtable {
    let mut mem = Memtable::new();
    for id in 1..=node_count {
        let mut record = NodeRecord::new(id, vec![1], attrs! { "name" => format!("n{}", id) });
        if id < node_count {
            record.push_out(id + 1, attrs! {});
        }
        if id > 1 {
            record.push_in(id - 1, attrs! {});
        }
        mem.upsert(record);
    }
    mem
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    for threshold in [1_000_000usize, 1_000] {
        group.bench_with_input(
            BenchmarkId::new("threshold", threshold),
            &threshold,
            |b, &threshold| {
                b.iter_batched(
                    || {
                        let dir = TempDir::new().unwrap();
                        let storage = HappyStorage::open(dir.path(), config(threshold)).unwrap();
                        (dir, storage)
                    },
                    |(_dir, storage)| {
                        for i in 0..5_000i64 {
                            black_box(storage.add(&["n"], attrs! { "i" => i }).unwrap());
                        }
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }
    group.finish();
}

fn bench_link(c: &mut Criterion) {
    let (_dir, storage) = create_test_graph(10_000, 1_000_000);
    let mut from: NodeId = 1;
    c.bench_function("link", |b| {
        b.iter(|| {
            from = from % 9_999 + 1;
            storage.link(black_box(from), from + 1, attrs! {}).unwrap();
        })
    });
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

fn bench_node(c: &mut Criterion) {
    let mut group = c.benchmark_group("node");

    let (_mem_dir, in_memory) = create_test_graph(10_000, 1_000_000);
    group.bench_function("memtable", |b| {
        let mut id = 0;
        b.iter(|| {
            id = id % 10_000 + 1;
            black_box(in_memory.node(id).unwrap());
        })
    });

    let (_disk_dir, on_disk) = create_test_graph(10_000, 1_000);
    on_disk.freeze().unwrap();
    on_disk.wait_for_flushes().unwrap();
    group.bench_function("segments", |b| {
        let mut id = 0;
        b.iter(|| {
            id = id % 10_000 + 1;
            black_box(on_disk.node(id).unwrap());
        })
    });
    group.bench_function("miss", |b| {
        let mut id = 1_000_000;
        b.iter(|| {
            id += 1;
            black_box(on_disk.node(id).is_err());
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    for size in [1_000u64, 10_000] {
        let mem = create_memtable(size);
        group.bench_with_input(BenchmarkId::new("locality_order", size), &mem, |b, mem| {
            b.iter(|| black_box(locality_order(mem)))
        });
        group.bench_with_input(BenchmarkId::new("write_nodetable", size), &mem, |b, mem| {
            b.iter(|| {
                let mut buf = Vec::with_capacity(1 << 20);
                NodetableWriter::new(mem, 1 << 20, 3).finish(&mut buf).unwrap();
                black_box(buf)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_link, bench_node, bench_codec);
criterion_main!(benches);
