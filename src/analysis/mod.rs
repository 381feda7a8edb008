// Numeric core
// Time alignment, per-bucket percentile aggregation and risk feature extraction

pub mod alignment;
pub mod excursions;
pub mod percentiles;
pub mod risk;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProfileKind;

pub use alignment::{
    AlignedDay, Alignment, AlignmentSummary, InsufficientDataError, Reading, RejectedDay,
    Sufficiency, align_readings, bucket_index, bucket_label, evaluate_sufficiency,
};
pub use excursions::{
    DailyBreakdown, DateCount, ExcursionDistribution, ExcursionKind, daily_breakdown,
    days_below_target, excursion_distributions,
};
pub use percentiles::{
    BucketProfile, BucketValues, PercentileProfile, Percentiles, aggregate_percentiles,
    collect_bucket_values, interpolated_percentile,
};
pub use risk::{
    BandShare, EnvelopeSummary, GlycemiaRiskIndex, Quadrant, QuadrantWindow, RiskFeatureSet,
    RiskKind, RiskWindow, WidthStatus, extract_risk_features,
};

/// Number of five-minute slots in a day
pub const BUCKETS_PER_DAY: usize = 288;
/// Width of a time bucket in minutes
pub const BUCKET_MINUTES: u32 = 5;
/// Consensus time-in-range target as a fraction of readings
pub const TIR_TARGET: f64 = 0.70;

/// Thresholds for alignment sufficiency and risk detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum number of valid days for a sufficient profile
    pub min_days: usize,
    /// Minimum filled fraction of bucket slots across valid days
    pub min_coverage_ratio: f64,
    /// Days filling less than this fraction of their buckets are rejected
    pub min_day_fill_ratio: f64,
    /// Target glucose range in mg/dL, inclusive on both ends; the profile's
    /// range when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_range: Option<(f64, f64)>,
    /// %CV above which the whole profile is flagged
    pub cv_threshold: f64,
    /// Consecutive buckets required for a sustained high/low window
    pub sustained_buckets: usize,
    /// Missing-bucket fraction above which features are low confidence
    pub low_confidence_missing_ratio: f64,
    /// Patient profile supplying glucose bands
    pub profile: ProfileKind,
}

impl Default for AnalysisConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_days: 14,
            min_coverage_ratio: 0.70,
            min_day_fill_ratio: 0.50,
            target_range: None,
            cv_threshold: 36.0,
            sustained_buckets: 3,
            low_confidence_missing_ratio: 0.30,
            profile: ProfileKind::default(),
        }
    }
}

impl AnalysisConfig {
    /// Select a profile and drop any explicit target range override
    #[inline]
    pub fn apply_profile(&mut self, kind: ProfileKind) {
        self.profile = kind;
        self.target_range = None;
    }

    /// Effective target range: the explicit override, else the profile's
    #[inline]
    pub fn target_range(&self) -> (f64, f64) {
        self.target_range.unwrap_or_else(|| self.profile.profile().target_range)
    }
}

/// Quadrant classification thresholds
///
/// The defaults for the IQR/IDR widths follow the envelope categories used by
/// clinicians reading AGP reports (IQR 30/45 mg/dL, IDR 80/120 mg/dL). The slope
/// cutoff has no published default and is a tunable placeholder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuadrantConfig {
    pub iqr_narrow: f64,
    pub iqr_wide: f64,
    pub idr_narrow: f64,
    pub idr_wide: f64,
    /// Median trend magnitude in mg/dL per bucket treated as a systematic drift
    pub slope_threshold: f64,
    pub window_buckets: usize,
    pub window_stride: usize,
    /// Fraction of a window's buckets that must be present to classify it
    pub min_window_coverage: f64,
}

impl Default for QuadrantConfig {
    #[inline]
    fn default() -> Self {
        Self {
            iqr_narrow: 30.0,
            iqr_wide: 45.0,
            idr_narrow: 80.0,
            idr_wide: 120.0,
            slope_threshold: 1.0,
            window_buckets: 12,
            window_stride: 12,
            min_window_coverage: 0.5,
        }
    }
}

/// Output of the numeric core for one dataset
#[derive(Debug, Clone)]
pub struct NumericAnalysis {
    pub alignment: Alignment,
    pub profile: PercentileProfile,
    pub features: RiskFeatureSet,
}

/// Run alignment, aggregation and feature extraction over a reading set
///
/// Never fails: shortfalls are carried on the alignment's sufficiency and the
/// feature set's confidence flag.
#[inline]
pub fn analyze_numeric(
    readings: &[Reading],
    analysis: &AnalysisConfig,
    quadrant: &QuadrantConfig,
) -> NumericAnalysis {
    let alignment = align_readings(readings, analysis);
    let values = collect_bucket_values(&alignment);
    let profile = aggregate_percentiles(&values);
    let features = extract_risk_features(
        &alignment,
        &profile,
        analysis,
        quadrant,
        &analysis.profile.profile(),
    );

    debug!(
        "Numeric analysis: {} valid days, {} rejected, {} readings, low_confidence={}",
        alignment.days.len(),
        alignment.rejected_days.len(),
        features.reading_count,
        features.low_confidence
    );

    NumericAnalysis {
        alignment,
        profile,
        features,
    }
}
