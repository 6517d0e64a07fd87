//! Synchronized walk benchmarks.
//!
//! # Running
//!
//! ```bash
//! cargo bench -p quadgit-diff --bench sync_walk
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use quadgit_diff::{stream_diff, DiffOptions, SyncWalk};
use quadgit_store::{Keyspace, KvBackend, MemoryKv, ObjectStore, Tree};
use quadgit_types::Quad;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `n` quads of one graph, every `stride`-th one tagged with `variant`.
fn quads(n: usize, stride: usize, variant: &str) -> Vec<Quad> {
    let mut out: Vec<Quad> = (0..n)
        .map(|i| {
            let object = if i % stride == 0 {
                format!("\"{variant}-{i}\"")
            } else {
                format!("\"{i}\"")
            };
            Quad::new(format!("ex:s{i:08}"), "ex:value", object, "ex:bench")
        })
        .collect();
    out.sort();
    out
}

fn tree_of(store: &ObjectStore, quads: Vec<Quad>) -> Tree {
    let mut txn = store.backend().begin().expect("begin");
    let mut tree = Tree::empty();
    if let Some(id) = store
        .write_graph(txn.as_mut(), "ex:bench", quads)
        .expect("write graph")
    {
        tree.insert("ex:bench", id);
    }
    txn.commit().expect("commit");
    tree
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_in_memory_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_walk/in_memory");
    for n in [1_000usize, 10_000, 100_000] {
        let left = quads(n, 10, "left");
        let right = quads(n, 10, "right");
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let walk = SyncWalk::new(
                    left.iter().map(Ok::<_, Infallible>),
                    right.iter().map(Ok::<_, Infallible>),
                );
                walk.count()
            })
        });
    }
    group.finish();
}

fn bench_stream_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync_walk/stream_diff");
    group.sample_size(20);
    for n in [1_000usize, 10_000] {
        let store = ObjectStore::new(Arc::new(MemoryKv::new()), Keyspace::default());
        let from = tree_of(&store, quads(n, 100, "from"));
        let to = tree_of(&store, quads(n, 100, "to"));
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| stream_diff(&store, Some(&from), &to, DiffOptions::new()).count())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_in_memory_walk, bench_stream_diff);
criterion_main!(benches);
