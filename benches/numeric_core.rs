use cgm_insight::analysis::{
    AnalysisConfig, BUCKETS_PER_DAY, QuadrantConfig, Reading, analyze_numeric,
};
use cgm_insight::embeddings::{Embedder, HashingEmbedder};
use cgm_insight::retrieval::encode_query;
use chrono::{NaiveDate, TimeDelta};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// Ninety days of five-minute readings with a daily swing and a little jitter
fn readings(days: u32) -> Vec<Reading> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 2, 0)
        .expect("valid time");
    (0..days as usize * BUCKETS_PER_DAY)
        .map(|i| {
            let phase = (i % BUCKETS_PER_DAY) as f64 / BUCKETS_PER_DAY as f64;
            let swing = (phase * std::f64::consts::TAU).sin().mul_add(60.0, 140.0);
            let jitter = ((i * 7919) % 23) as f64;
            let minutes = i64::try_from(i * 5).expect("fits");
            Reading::new(start + TimeDelta::minutes(minutes), swing + jitter)
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let readings = readings(90);
    let analysis = AnalysisConfig::default();
    let quadrant = QuadrantConfig::default();

    c.bench_function("analyze_numeric_90_days", |b| {
        b.iter(|| analyze_numeric(black_box(&readings), &analysis, &quadrant))
    });

    let features = analyze_numeric(&readings, &analysis, &quadrant).features;
    let embedder = HashingEmbedder::new(384);
    c.bench_function("encode_and_embed_query", |b| {
        b.iter(|| {
            let text = encode_query(black_box(&features), &analysis);
            embedder.embed_one(&text)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
