use super::*;
use crate::analysis::{AnalysisConfig, Reading, align_readings};
use chrono::{NaiveDate, TimeDelta};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// Deterministic pseudo-random glucose trace spanning `days` full days
fn noisy_readings(days: u32, seed: u64) -> Vec<Reading> {
    let mut state = seed;
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    let total = i64::from(days) * 288;
    (0..total)
        .filter_map(|i| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let jitter = (state >> 33) % 200;
            // leave a handful of gaps
            (jitter != 7).then(|| {
                Reading::new(
                    start + TimeDelta::minutes(i * 5),
                    40.0 + jitter as f64 * 1.5,
                )
            })
        })
        .collect()
}

#[test]
fn interpolation_matches_linear_method() {
    let sorted = [1.0, 2.0, 3.0, 4.0];
    assert_close(interpolated_percentile(&sorted, 0.0).expect("non-empty"), 1.0);
    assert_close(interpolated_percentile(&sorted, 0.25).expect("non-empty"), 1.75);
    assert_close(interpolated_percentile(&sorted, 0.5).expect("non-empty"), 2.5);
    assert_close(interpolated_percentile(&sorted, 0.95).expect("non-empty"), 3.85);
    assert_close(interpolated_percentile(&sorted, 1.0).expect("non-empty"), 4.0);
}

#[test]
fn single_sample_collapses_all_levels() {
    let p = Percentiles::from_sorted(&[123.0]).expect("one sample");
    assert_eq!(p.p5, 123.0);
    assert_eq!(p.p95, 123.0);
    assert_eq!(p.iqr(), 0.0);
    assert_eq!(p.idr(), 0.0);
}

#[test]
fn empty_sample_has_no_percentiles() {
    assert!(interpolated_percentile(&[], 0.5).is_none());
    assert!(Percentiles::from_sorted(&[]).is_none());
}

#[test]
fn percentiles_are_ordered_in_every_present_bucket() {
    let readings = noisy_readings(21, 42);
    let alignment = align_readings(&readings, &AnalysisConfig::default());
    let profile = aggregate_percentiles(&collect_bucket_values(&alignment));

    assert_eq!(profile.buckets.len(), 288);
    for bucket in &profile.buckets {
        let p = bucket.percentiles.expect("every bucket has samples");
        assert!(bucket.sample_count > 0);
        assert!(p.p5 <= p.p25, "bucket {}", bucket.bucket);
        assert!(p.p25 <= p.p50, "bucket {}", bucket.bucket);
        assert!(p.p50 <= p.p75, "bucket {}", bucket.bucket);
        assert!(p.p75 <= p.p95, "bucket {}", bucket.bucket);
    }
}

#[test]
fn empty_buckets_are_marked_missing() {
    let day = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let midnight = day.and_hms_opt(0, 0, 0).expect("valid time");
    // first 200 buckets only
    let readings: Vec<Reading> = (0..200)
        .map(|b| Reading::new(midnight + TimeDelta::minutes(b * 5), 100.0))
        .collect();

    let alignment = align_readings(&readings, &AnalysisConfig::default());
    let profile = aggregate_percentiles(&collect_bucket_values(&alignment));

    assert_eq!(profile.missing_count(), 88);
    let last = profile.buckets.last().expect("288 buckets");
    assert!(last.is_missing());
    assert!(last.percentiles.is_none());
    assert!(profile.get(287).is_none());
    assert!(profile.get(10).is_some());
    assert_eq!(profile.present().count(), 200);
}

#[test]
fn profile_is_byte_identical_across_runs_and_orders() {
    let mut readings = noisy_readings(15, 7);
    let config = AnalysisConfig::default();

    let first = aggregate_percentiles(&collect_bucket_values(&align_readings(&readings, &config)));
    readings.reverse();
    let second = aggregate_percentiles(&collect_bucket_values(&align_readings(&readings, &config)));

    let first_json = serde_json::to_string(&first).expect("serializes");
    let second_json = serde_json::to_string(&second).expect("serializes");
    assert_eq!(first_json, second_json);
}

#[test]
fn empty_profile_reports_everything_missing() {
    let alignment = align_readings(&[], &AnalysisConfig::default());
    let profile = aggregate_percentiles(&collect_bucket_values(&alignment));
    assert_eq!(profile.missing_count(), 288);
    assert_eq!(profile.missing_ratio(), 1.0);
}
