#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end analysis runs
//!
//! CSV ingestion, the numeric core, retrieval over a freshly built reference
//! index and template narration, all offline with the hashing embedder.

use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cgm_insight::analysis::{
    AnalysisConfig, BUCKETS_PER_DAY, ExcursionKind, QuadrantConfig, Reading, RiskKind,
    analyze_numeric,
};
use cgm_insight::database::Database;
use cgm_insight::embeddings::chunking::ChunkingConfig;
use cgm_insight::embeddings::{Embedder, HashingEmbedder};
use cgm_insight::indexer::ReferenceIndexer;
use cgm_insight::ingest::parse_csv;
use cgm_insight::pipeline::{AnalysisPipeline, NoticeKind};
use cgm_insight::retrieval::{RetrievalEngine, SharedIndex};

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 2, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time")
}

fn readings(days: u32, value: impl Fn(u32, usize) -> f64) -> Vec<Reading> {
    let mut readings = Vec::new();
    for day in 0..days {
        for bucket in 0..BUCKETS_PER_DAY {
            let minutes = i64::from(day) * 1440 + i64::try_from(bucket * 5).expect("fits");
            readings.push(Reading::new(
                start() + TimeDelta::minutes(minutes),
                value(day, bucket),
            ));
        }
    }
    readings
}

/// Readings written as a device export with a metadata preamble
fn export_csv(readings: &[Reading]) -> String {
    let mut csv = String::from("Name,Export\nDevice,Sensor\n\nIndex,Date,Time,Sensor Glucose (mg/dL)\n");
    for (i, reading) in readings.iter().enumerate() {
        writeln!(
            csv,
            "{},{},{},{}",
            i,
            reading.timestamp.format("%Y/%m/%d"),
            reading.timestamp.format("%H:%M:%S"),
            reading.glucose_mgdl
        )
        .expect("writing to a String cannot fail");
    }
    csv
}

async fn build_reference_index(temp_dir: &TempDir, documents: &[(&str, &str)]) -> Result<SharedIndex> {
    let corpus = temp_dir.path().join("references");
    std::fs::create_dir_all(&corpus)?;
    for (name, content) in documents {
        std::fs::write(corpus.join(name), content)?;
    }

    let database = Database::initialize_from_config_dir(temp_dir.path()).await?;
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
    ReferenceIndexer::new(database.clone(), embedder, ChunkingConfig::default())
        .build(&corpus, false)
        .await?;
    SharedIndex::load(&database).await
}

fn pipeline(index: SharedIndex) -> AnalysisPipeline {
    let engine = RetrievalEngine::new(Arc::new(index), Arc::new(HashingEmbedder::new(256)), 5);
    AnalysisPipeline::new(
        AnalysisConfig::default(),
        QuadrantConfig::default(),
        Arc::new(engine),
    )
}

#[test]
fn single_high_day_is_not_a_sustained_window() {
    // Twenty days in range except day 7, which sits at 250 mg/dL all day
    let readings = readings(20, |day, bucket| {
        if day == 7 {
            250.0
        } else {
            100.0 + (bucket % 40) as f64
        }
    });

    let analysis = analyze_numeric(
        &readings,
        &AnalysisConfig::default(),
        &QuadrantConfig::default(),
    );
    let features = &analysis.features;

    assert!(analysis.alignment.sufficiency.sufficient);
    assert_eq!(features.reading_count, 20 * BUCKETS_PER_DAY);
    assert!((features.tar - 1.0 / 20.0).abs() < 1e-9, "tar = {}", features.tar);
    assert!((features.tir - 19.0 / 20.0).abs() < 1e-9, "tir = {}", features.tir);
    assert!(features.tbr.abs() < 1e-12);
    assert!((features.tir + features.tbr + features.tar - 1.0).abs() < 1e-9);
    assert_eq!(features.windows_of(RiskKind::SustainedHigh).count(), 0);
    assert_eq!(features.windows_of(RiskKind::SustainedLow).count(), 0);
    assert!(!features.low_confidence);

    let high_day = features
        .daily
        .iter()
        .find(|d| d.date == start().date() + chrono::Days::new(7))
        .expect("day 7 is a valid day");
    assert!((high_day.tar - 1.0).abs() < 1e-12);
    assert_eq!(features.daily.iter().filter(|d| d.tar > 0.0).count(), 1);
    let high = features
        .excursion(ExcursionKind::High)
        .expect("high distribution");
    assert_eq!(high.count, BUCKETS_PER_DAY);
    assert_eq!(high.by_date.len(), 1);
}

#[tokio::test]
async fn empty_reference_directory_still_completes() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let index = build_reference_index(&temp_dir, &[]).await?;
    assert!(index.snapshot().is_empty());

    let report = pipeline(index)
        .analyze(readings(14, |_, _| 120.0), &CancellationToken::new())
        .await?;

    assert!(report.retrieval.is_empty());
    assert!(report.has_notice(NoticeKind::NoReferenceData));
    assert!(report.narrative.is_template());
    assert!(!report.narrative.grounded);
    assert!(!report.narrative.text.is_empty());
    Ok(())
}

#[tokio::test]
async fn csv_export_runs_end_to_end() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let index = build_reference_index(
        &temp_dir,
        &[
            (
                "variability.md",
                "# Glucose variability\n\nA coefficient of variation above 36% indicates unstable glucose.\n",
            ),
            (
                "targets.md",
                "# Consensus targets\n\nTime in range above 70% is the primary target. Time below range should stay under 4%.\n",
            ),
        ],
    )
    .await?;

    let source = readings(15, |day, bucket| {
        if (bucket + day as usize) % 4 == 0 {
            65.0
        } else {
            150.0 + (bucket % 30) as f64
        }
    });
    let ingested = parse_csv(Cursor::new(export_csv(&source).into_bytes()))?;
    assert_eq!(ingested.readings.len(), source.len());

    let report = pipeline(index)
        .analyze(ingested.readings, &CancellationToken::new())
        .await?;

    assert!(report.alignment.sufficient);
    assert_eq!(report.alignment.valid_days, 15);
    assert_eq!(report.retrieval.matches.len(), 2);
    assert!(report.narrative.grounded);
    assert!(report.narrative.text.contains("Relevant references:"));
    assert!(!report.has_notice(NoticeKind::NoReferenceData));
    assert!(report.has_notice(NoticeKind::TemplateNarrative));

    let json = serde_json::to_string(&report)?;
    assert!(json.contains("\"run_id\""));
    Ok(())
}

#[tokio::test]
async fn identical_inputs_give_identical_reports() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let index = build_reference_index(
        &temp_dir,
        &[
            ("a.md", "# Lows\n\nNocturnal hypoglycemia often follows evening insulin."),
            ("b.md", "# Highs\n\nPost-meal hyperglycemia raises time above range."),
        ],
    )
    .await?;
    let pipeline = pipeline(index);
    let data = || readings(14, |day, bucket| 90.0 + ((bucket * 11 + day as usize) % 120) as f64);

    let first = pipeline.analyze(data(), &CancellationToken::new()).await?;
    let second = pipeline.analyze(data(), &CancellationToken::new()).await?;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        serde_json::to_string(&first.percentiles)?,
        serde_json::to_string(&second.percentiles)?
    );
    assert_eq!(
        serde_json::to_string(&first.features)?,
        serde_json::to_string(&second.features)?
    );
    assert_eq!(first.retrieval, second.retrieval);
    assert_eq!(first.narrative.text, second.narrative.text);
    Ok(())
}
