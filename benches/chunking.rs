use cgm_insight::embeddings::chunking::{ChunkingConfig, chunk_document};
use criterion::{Criterion, criterion_group, criterion_main};
use std::fmt::Write as _;
use std::hint::black_box;

fn reference_document() -> String {
    let mut doc = String::from("# Interpreting the ambulatory glucose profile\n\n");
    for section in 0..20 {
        write!(doc, "## Section {section}\n\n").expect("can write to string");
        for paragraph in 0..6 {
            write!(
                doc,
                "Paragraph {paragraph} of section {section}. Time in range above 70% is the \
                 consensus target. A coefficient of variation at or below 36% indicates stable \
                 glucose. Wide interquartile ranges suggest inconsistent daily routines.\n\n"
            )
            .expect("can write to string");
        }
    }
    doc
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let content = reference_document();
    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| chunk_document(black_box(&content), "AGP guide", black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
