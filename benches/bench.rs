//! Criterion benchmarks for Pilum.
//!
//! Covers the hot paths of a query:
//! - Tokenization
//! - BM25 search over the sparse index
//! - Reciprocal rank fusion
//! - Exact vector search
//! - Copy-on-write inserts

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pilum::analysis::{SimpleTokenizer, Tokenizer};
use pilum::chunk::Chunk;
use pilum::hybrid::fusion::{FusionConfig, reciprocal_rank_fusion};
use pilum::lexical::{Bm25Params, SparseIndex};
use pilum::ranking::{RankedHit, RankedList, RetrievalSource};
use pilum::vector::{HashEmbedder, InMemoryVectorIndex};

/// Generate test chunks for benchmarking.
fn generate_test_chunks(count: usize) -> Vec<Chunk> {
    let words = [
        "kubernetes",
        "docker",
        "networking",
        "ingress",
        "service",
        "pod",
        "deployment",
        "volume",
        "secret",
        "namespace",
        "scheduler",
        "controller",
        "cluster",
        "node",
        "container",
        "image",
        "registry",
        "helm",
        "chart",
        "operator",
        "metrics",
        "logging",
        "tracing",
        "latency",
    ];

    (0..count)
        .map(|i| {
            let length = 40 + (i % 80); // Variable length chunks
            let text = (0..length)
                .map(|j| words[(i * 7 + j * 13) % words.len()]) // Pseudo-random distribution
                .collect::<Vec<_>>()
                .join(" ");
            Chunk::new(format!("chunk-{i:06}"), format!("doc-{}", i / 8), text)
        })
        .collect()
}

fn ranked_list(source: RetrievalSource, count: usize, offset: usize) -> RankedList {
    RankedList::new(
        source,
        (0..count)
            .map(|i| {
                RankedHit::new(
                    format!("chunk-{:06}", (i * 3 + offset) % (count * 2)),
                    (count - i) as f64,
                )
            })
            .collect(),
    )
}

fn bench_tokenization(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenization");
    let chunks = generate_test_chunks(100);

    group.throughput(Throughput::Elements(chunks.len() as u64));
    group.bench_function("simple_tokenizer_100_chunks", |b| {
        b.iter(|| {
            for chunk in &chunks {
                black_box(SimpleTokenizer.tokenize(black_box(&chunk.text)));
            }
        })
    });

    group.finish();
}

fn bench_sparse_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("sparse_search");

    for size in [1_000, 10_000] {
        let index = SparseIndex::from_chunks(generate_test_chunks(size), Bm25Params::default());
        group.bench_with_input(BenchmarkId::new("bm25_top20", size), &index, |b, index| {
            b.iter(|| black_box(index.search(black_box("kubernetes ingress latency"), 20)))
        });
    }

    group.finish();
}

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion");
    let config = FusionConfig::default();

    for depth in [20, 200] {
        let lists = vec![
            ranked_list(RetrievalSource::Keyword, depth, 0),
            ranked_list(RetrievalSource::Vector, depth, 1),
        ];
        group.bench_with_input(BenchmarkId::new("rrf_two_lists", depth), &lists, |b, lists| {
            b.iter(|| black_box(reciprocal_rank_fusion(black_box(lists), &config)))
        });
    }

    group.finish();
}

fn bench_vector_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_search");
    group.sample_size(20);

    let dimension = 128;
    let embedder = HashEmbedder::new(dimension);
    let store = InMemoryVectorIndex::new(dimension);
    for chunk in generate_test_chunks(5_000) {
        let vector = embedder.embed_sync(&chunk.text).unwrap();
        store.upsert(&chunk, vector).unwrap();
    }
    let query = embedder.embed_sync("kubernetes ingress latency").unwrap();

    group.bench_function("exact_cosine_5k_top20", |b| {
        b.iter(|| black_box(store.search_exact(black_box(&query), 20).unwrap()))
    });

    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(10);

    let base = generate_test_chunks(5_000);
    let extra: Vec<Chunk> = generate_test_chunks(5_100).split_off(5_000);

    group.throughput(Throughput::Elements(extra.len() as u64));
    group.bench_function("copy_on_write_insert_100_into_5k", |b| {
        b.iter_with_setup(
            || SparseIndex::from_chunks(base.clone(), Bm25Params::default()),
            |index| {
                index.insert(extra.clone());
                black_box(index);
            },
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_tokenization,
    bench_sparse_search,
    bench_fusion,
    bench_vector_search,
    bench_insert
);
criterion_main!(benches);
