//! Strata Fingerprint Benchmarks
//!
//! Benchmarks for fingerprint generation and similarity search using
//! Criterion. Run with: cargo bench -p strata-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chrono::{Duration, Utc};
use strata_core::pipeline::CompressionPipeline;
use strata_core::record::MemoryRecord;
use strata_core::{Fingerprint, FingerprintIndex};

fn sample_texts() -> Vec<String> {
    let topics = [
        "database migration for the billing schema",
        "refactored the authentication middleware",
        "customer reported a timeout in the export endpoint",
        "scheduled the quarterly capacity review",
        "fixed the flaky integration test around retries",
    ];
    (0..200)
        .map(|i| format!("{} iteration {}", topics[i % topics.len()], i))
        .collect()
}

fn bench_generate(c: &mut Criterion) {
    let texts = sample_texts();
    c.bench_function("fingerprint_generate_200", |b| {
        b.iter(|| {
            let mut index = FingerprintIndex::new();
            for (i, text) in texts.iter().enumerate() {
                black_box(index.generate(
                    text,
                    None,
                    Utc::now() - Duration::days((i % 30) as i64),
                ));
            }
        })
    });
}

fn bench_similarity(c: &mut Criterion) {
    let mut index = FingerprintIndex::new();
    let a = index.generate("database migration for the billing schema", None, Utc::now());
    let b_fp = index.generate("billing schema migration landed in the database", None, Utc::now());

    c.bench_function("fingerprint_similarity", |b| {
        b.iter(|| black_box(FingerprintIndex::similarity(&a, &b_fp)))
    });
}

fn bench_find_similar(c: &mut Criterion) {
    let texts = sample_texts();
    let mut index = FingerprintIndex::new();
    let corpus: Vec<Fingerprint> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| index.generate(t, None, Utc::now() - Duration::days((i % 30) as i64)))
        .collect();
    let query = index.generate("billing schema migration progress", None, Utc::now());

    c.bench_function("find_similar_corpus_200", |b| {
        b.iter(|| black_box(FingerprintIndex::find_similar(&query, &corpus, 0.3, 10)))
    });
}

fn bench_pipeline_compress(c: &mut Criterion) {
    let record = MemoryRecord::new(
        "Yesterday we finished the database migration for the billing schema \
         and then deployed 3 services to the staging cluster in 45 minutes",
    );
    let mut pipeline = CompressionPipeline::new();

    c.bench_function("pipeline_compress_default", |b| {
        b.iter(|| black_box(pipeline.compress(&record, None).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_generate,
    bench_similarity,
    bench_find_similar,
    bench_pipeline_compress
);
criterion_main!(benches);
