//! Risk feature extraction
//!
//! Turns the aligned readings and the percentile profile into scalar glycemic
//! metrics, quadrant classifications for time-of-day windows and flagged risk
//! windows. Extraction never fails; sparse input is reported through
//! `low_confidence`.


use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::alignment::{Alignment, bucket_label};
use super::excursions::{
    DailyBreakdown, ExcursionDistribution, ExcursionKind, daily_breakdown, excursion_distributions,
};
use super::percentiles::{PercentileProfile, Percentiles};
use super::{AnalysisConfig, BUCKET_MINUTES, BUCKETS_PER_DAY, QuadrantConfig};
use crate::config::{BandKind, PatientProfile};

/// Weights of the Glycemia Risk Index hypo and hyper components
const GRI_HYPO_WEIGHT: f64 = 3.0;
const GRI_HYPER_WEIGHT: f64 = 1.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Quadrant {
    /// Flat, narrow and in range
    #[serde(rename = "FNIR")]
    Fnir,
    #[serde(rename = "treatment-issue")]
    TreatmentIssue,
    #[serde(rename = "behavior-issue")]
    BehaviorIssue,
    #[serde(rename = "mixed")]
    Mixed,
}

impl Quadrant {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fnir => "FNIR",
            Self::TreatmentIssue => "treatment-issue",
            Self::BehaviorIssue => "behavior-issue",
            Self::Mixed => "mixed",
        }
    }
}

impl fmt::Display for Quadrant {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidthStatus {
    Narrow,
    Moderate,
    Wide,
}

impl WidthStatus {
    #[inline]
    pub fn classify(width: f64, narrow: f64, wide: f64) -> Self {
        if width <= narrow {
            Self::Narrow
        } else if width >= wide {
            Self::Wide
        } else {
            Self::Moderate
        }
    }
}

impl fmt::Display for WidthStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Narrow => write!(f, "narrow"),
            Self::Moderate => write!(f, "moderate"),
            Self::Wide => write!(f, "wide"),
        }
    }
}

/// Shape of the percentile envelope over the whole day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeSummary {
    pub mean_iqr: f64,
    pub mean_idr: f64,
    pub iqr_status: WidthStatus,
    pub idr_status: WidthStatus,
    pub peak_iqr: f64,
    pub peak_iqr_time: String,
    pub peak_idr: f64,
    pub peak_idr_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuadrantWindow {
    pub start_bucket: usize,
    pub end_bucket: usize,
    pub start_time: String,
    pub end_time: String,
    pub present_buckets: usize,
    pub mean_iqr: Option<f64>,
    pub mean_idr: Option<f64>,
    pub mean_p50: Option<f64>,
    /// Least-squares P50 trend in mg/dL per bucket over present buckets
    pub p50_slope: Option<f64>,
    /// `None` when too few buckets are present to classify
    pub category: Option<Quadrant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    SustainedHigh,
    SustainedLow,
    HighVariability,
}

impl fmt::Display for RiskKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SustainedHigh => write!(f, "sustained high"),
            Self::SustainedLow => write!(f, "sustained low"),
            Self::HighVariability => write!(f, "high variability"),
        }
    }
}

/// A bucket range where a threshold rule fired
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskWindow {
    pub kind: RiskKind,
    pub start_bucket: usize,
    pub end_bucket: usize,
    pub start_time: String,
    pub end_time: String,
    pub duration_buckets: usize,
    /// Highest P75 for highs, lowest P5 for lows, %CV for variability
    pub extreme_value: f64,
    pub threshold: f64,
    /// Relative deviation beyond the threshold weighted by duration in hours
    pub severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlycemiaRiskIndex {
    pub score: f64,
    pub hypo_component: f64,
    pub hyper_component: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandShare {
    pub kind: BandKind,
    pub label: &'static str,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFeatureSet {
    pub reading_count: usize,
    pub mean: f64,
    pub sd: f64,
    pub cv: f64,
    pub tir: f64,
    pub tbr: f64,
    pub tar: f64,
    pub gmi: f64,
    pub mage: f64,
    pub gri: GlycemiaRiskIndex,
    pub bands: Vec<BandShare>,
    pub daily: Vec<DailyBreakdown>,
    pub excursions: Vec<ExcursionDistribution>,
    pub envelope: Option<EnvelopeSummary>,
    pub quadrants: Vec<QuadrantWindow>,
    pub risk_windows: Vec<RiskWindow>,
    pub missing_bucket_ratio: f64,
    pub low_confidence: bool,
}

impl RiskFeatureSet {
    #[inline]
    pub fn excursion(&self, kind: ExcursionKind) -> Option<&ExcursionDistribution> {
        self.excursions.iter().find(|e| e.kind == kind)
    }

    /// Risk windows of a given kind
    #[inline]
    pub fn windows_of(&self, kind: RiskKind) -> impl Iterator<Item = &RiskWindow> + '_ {
        self.risk_windows.iter().filter(move |w| w.kind == kind)
    }

    /// Classified windows grouped by category, in category order
    #[inline]
    pub fn quadrant_counts(&self) -> Vec<(Quadrant, usize)> {
        [
            Quadrant::Fnir,
            Quadrant::TreatmentIssue,
            Quadrant::BehaviorIssue,
            Quadrant::Mixed,
        ]
        .into_iter()
        .map(|q| {
            let count = self
                .quadrants
                .iter()
                .filter(|w| w.category == Some(q))
                .count();
            (q, count)
        })
        .collect()
    }
}

#[inline]
pub fn extract_risk_features(
    alignment: &Alignment,
    profile: &PercentileProfile,
    analysis: &AnalysisConfig,
    quadrant: &QuadrantConfig,
    patient: &PatientProfile,
) -> RiskFeatureSet {
    let values: Vec<f64> = alignment.chronological_values().collect();
    let (low, high) = analysis.target_range();

    let stats = SummaryStats::from_values(&values);
    let (tbr, tir, tar) = range_fractions(&values, low, high);
    let bands = band_shares(&values, patient);
    let gri = glycemia_risk_index(&bands);

    let mut risk_windows = sustained_windows(
        profile,
        RiskKind::SustainedHigh,
        high,
        analysis.sustained_buckets,
    );
    risk_windows.extend(sustained_windows(
        profile,
        RiskKind::SustainedLow,
        low,
        analysis.sustained_buckets,
    ));
    risk_windows.extend(variability_window(
        stats.cv,
        analysis.cv_threshold,
        values.len(),
        profile,
    ));

    let missing_bucket_ratio = profile.missing_ratio();
    let low_confidence =
        values.is_empty() || missing_bucket_ratio > analysis.low_confidence_missing_ratio;

    debug!(
        "Extracted features: mean={:.1} cv={:.1} tir={:.3} windows={} missing={:.2}",
        stats.mean,
        stats.cv,
        tir,
        risk_windows.len(),
        missing_bucket_ratio
    );

    RiskFeatureSet {
        reading_count: values.len(),
        mean: stats.mean,
        sd: stats.sd,
        cv: stats.cv,
        tir,
        tbr,
        tar,
        gmi: glucose_management_indicator(&values, stats.mean),
        mage: mean_amplitude_of_excursions(&values, stats.sd),
        gri,
        bands,
        daily: daily_breakdown(alignment, (low, high), patient),
        excursions: excursion_distributions(alignment),
        envelope: envelope_summary(profile, quadrant),
        quadrants: quadrant_windows(profile, (low, high), quadrant),
        risk_windows,
        missing_bucket_ratio,
        low_confidence,
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SummaryStats {
    mean: f64,
    sd: f64,
    cv: f64,
}

impl SummaryStats {
    fn from_values(values: &[f64]) -> Self {
        let Some(mean) = mean(values) else {
            return Self::default();
        };
        let sd = sample_sd(values, mean);
        let cv = if mean > 0.0 { sd / mean * 100.0 } else { 0.0 };
        Self { mean, sd, cv }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation with an n - 1 denominator
fn sample_sd(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let squares = values.iter().fold(0.0, |acc, v| {
        let d = v - mean;
        d.mul_add(d, acc)
    });
    (squares / (values.len() - 1) as f64).sqrt()
}

/// Fractions below, within (inclusive) and above the target range
pub(super) fn range_fractions(values: &[f64], low: f64, high: f64) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let below = values.iter().filter(|&&v| v < low).count();
    let above = values.iter().filter(|&&v| v > high).count();
    let within = values.len() - below - above;
    let total = values.len() as f64;
    (
        below as f64 / total,
        within as f64 / total,
        above as f64 / total,
    )
}

pub(super) fn band_shares(values: &[f64], patient: &PatientProfile) -> Vec<BandShare> {
    let total = values.len();
    patient
        .bands
        .iter()
        .map(|band| {
            let count = values.iter().filter(|&&v| band.contains(v)).count();
            BandShare {
                kind: band.kind,
                label: band.label,
                fraction: if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64
                },
            }
        })
        .collect()
}

fn band_percent(bands: &[BandShare], kind: BandKind) -> f64 {
    bands
        .iter()
        .find(|b| b.kind == kind)
        .map_or(0.0, |b| b.fraction * 100.0)
}

/// GRI = 3.0 VLow + 2.4 Low + 1.6 VHigh + 0.8 High, capped at 100
fn glycemia_risk_index(bands: &[BandShare]) -> GlycemiaRiskIndex {
    let very_low = band_percent(bands, BandKind::VeryLow);
    let low = band_percent(bands, BandKind::Low);
    let high = band_percent(bands, BandKind::High);
    let very_high = band_percent(bands, BandKind::VeryHigh);

    let hypo_component = low.mul_add(0.8, very_low);
    let hyper_component = high.mul_add(0.5, very_high);
    let score = hyper_component
        .mul_add(GRI_HYPER_WEIGHT, GRI_HYPO_WEIGHT * hypo_component)
        .min(100.0);

    GlycemiaRiskIndex {
        score,
        hypo_component,
        hyper_component,
    }
}

/// GMI (%) = 3.31 + 0.02392 x mean glucose in mg/dL
fn glucose_management_indicator(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    mean.mul_add(0.02392, 3.31)
}

/// Mean of consecutive absolute changes larger than one standard deviation
fn mean_amplitude_of_excursions(values: &[f64], sd: f64) -> f64 {
    let excursions: Vec<f64> = values
        .windows(2)
        .filter_map(|pair| match pair {
            [a, b] => Some((b - a).abs()),
            _ => None,
        })
        .filter(|&change| change > sd)
        .collect();
    mean(&excursions).unwrap_or(0.0)
}

fn envelope_summary(profile: &PercentileProfile, config: &QuadrantConfig) -> Option<EnvelopeSummary> {
    let present: Vec<(usize, &Percentiles)> = profile.present().collect();
    let iqrs: Vec<f64> = present.iter().map(|(_, p)| p.iqr()).collect();
    let idrs: Vec<f64> = present.iter().map(|(_, p)| p.idr()).collect();

    let mean_iqr = mean(&iqrs)?;
    let mean_idr = mean(&idrs)?;
    let (peak_iqr_bucket, peak_iqr) = peak(&present, Percentiles::iqr)?;
    let (peak_idr_bucket, peak_idr) = peak(&present, Percentiles::idr)?;

    Some(EnvelopeSummary {
        mean_iqr,
        mean_idr,
        iqr_status: WidthStatus::classify(mean_iqr, config.iqr_narrow, config.iqr_wide),
        idr_status: WidthStatus::classify(mean_idr, config.idr_narrow, config.idr_wide),
        peak_iqr,
        peak_iqr_time: bucket_label(peak_iqr_bucket),
        peak_idr,
        peak_idr_time: bucket_label(peak_idr_bucket),
    })
}

/// Earliest bucket with the largest width
fn peak(present: &[(usize, &Percentiles)], width: fn(&Percentiles) -> f64) -> Option<(usize, f64)> {
    present.iter().fold(None, |best, &(bucket, p)| {
        let w = width(p);
        match best {
            Some((_, best_w)) if best_w >= w => best,
            _ => Some((bucket, w)),
        }
    })
}

fn quadrant_windows(
    profile: &PercentileProfile,
    target_range: (f64, f64),
    config: &QuadrantConfig,
) -> Vec<QuadrantWindow> {
    let size = config.window_buckets.clamp(1, BUCKETS_PER_DAY);
    let stride = config.window_stride.max(1);
    let required = ((config.min_window_coverage * size as f64).ceil() as usize).max(1);

    (0..=BUCKETS_PER_DAY - size)
        .step_by(stride)
        .map(|start| {
            let end = start + size - 1;
            let present: Vec<(usize, &Percentiles)> = (start..=end)
                .filter_map(|b| profile.get(b).map(|p| (b, p)))
                .collect();

            let iqrs: Vec<f64> = present.iter().map(|(_, p)| p.iqr()).collect();
            let idrs: Vec<f64> = present.iter().map(|(_, p)| p.idr()).collect();
            let medians: Vec<f64> = present.iter().map(|(_, p)| p.p50).collect();
            let points: Vec<(f64, f64)> = present.iter().map(|(b, p)| (*b as f64, p.p50)).collect();

            let mean_iqr = mean(&iqrs);
            let mean_idr = mean(&idrs);
            let mean_p50 = mean(&medians);
            let p50_slope = least_squares_slope(&points);

            let category = if present.len() >= required {
                match (mean_iqr, mean_idr, p50_slope, mean_p50) {
                    (Some(iqr), Some(idr), Some(slope), Some(p50)) => {
                        Some(classify_window(iqr, idr, slope, p50, target_range, config))
                    }
                    _ => None,
                }
            } else {
                None
            };

            QuadrantWindow {
                start_bucket: start,
                end_bucket: end,
                start_time: bucket_label(start),
                end_time: bucket_label(end),
                present_buckets: present.len(),
                mean_iqr,
                mean_idr,
                mean_p50,
                p50_slope,
                category,
            }
        })
        .collect()
}

/// Assign a window to a quadrant from its envelope widths and median trend
#[inline]
pub fn classify_window(
    mean_iqr: f64,
    mean_idr: f64,
    slope: f64,
    mean_p50: f64,
    target_range: (f64, f64),
    config: &QuadrantConfig,
) -> Quadrant {
    let iqr_wide = mean_iqr >= config.iqr_wide;
    let idr_wide = mean_idr >= config.idr_wide;
    let drifting = slope.abs() >= config.slope_threshold;
    let out_of_range = mean_p50 < target_range.0 || mean_p50 > target_range.1;

    if iqr_wide && idr_wide {
        Quadrant::Mixed
    } else if iqr_wide || drifting || (!idr_wide && out_of_range) {
        Quadrant::TreatmentIssue
    } else if idr_wide {
        Quadrant::BehaviorIssue
    } else {
        Quadrant::Fnir
    }
}

fn least_squares_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        let dx = x - mean_x;
        (dx.mul_add(y - mean_y, sxy), dx.mul_add(dx, sxx))
    });
    (sxx > 0.0).then(|| sxy / sxx)
}

fn bucket_hours(buckets: usize) -> f64 {
    buckets as f64 * f64::from(BUCKET_MINUTES) / 60.0
}

#[derive(Debug, Clone, Copy)]
struct RunPoint {
    bucket: usize,
    value: f64,
    deviation: f64,
}

/// Runs of consecutive present buckets beyond a threshold
///
/// High runs test P75 above the threshold, low runs test P5 below it. Missing
/// buckets end a run and runs do not wrap across midnight.
fn sustained_windows(
    profile: &PercentileProfile,
    kind: RiskKind,
    threshold: f64,
    min_buckets: usize,
) -> Vec<RiskWindow> {
    let point = |bucket: usize, p: &Percentiles| -> Option<RunPoint> {
        match kind {
            RiskKind::SustainedHigh => (p.p75 > threshold).then(|| RunPoint {
                bucket,
                value: p.p75,
                deviation: p.p75 - threshold,
            }),
            RiskKind::SustainedLow => (p.p5 < threshold).then(|| RunPoint {
                bucket,
                value: p.p5,
                deviation: threshold - p.p5,
            }),
            RiskKind::HighVariability => None,
        }
    };

    let mut windows = Vec::new();
    let mut run: Vec<RunPoint> = Vec::new();

    for bucket in &profile.buckets {
        let Some(p) = bucket.percentiles.as_ref().and_then(|p| point(bucket.bucket, p)) else {
            windows.extend(close_run(&run, kind, threshold, min_buckets));
            run.clear();
            continue;
        };
        run.push(p);
    }
    windows.extend(close_run(&run, kind, threshold, min_buckets));
    windows
}

fn close_run(
    run: &[RunPoint],
    kind: RiskKind,
    threshold: f64,
    min_buckets: usize,
) -> Option<RiskWindow> {
    if run.len() < min_buckets.max(1) {
        return None;
    }
    let first = run.first()?;
    let last = run.last()?;
    let deviations: Vec<f64> = run.iter().map(|p| p.deviation).collect();
    let mean_deviation = mean(&deviations)?;
    let extreme_value = run.iter().map(|p| p.value).fold(first.value, |acc, v| match kind {
        RiskKind::SustainedLow => acc.min(v),
        _ => acc.max(v),
    });

    Some(RiskWindow {
        kind,
        start_bucket: first.bucket,
        end_bucket: last.bucket,
        start_time: bucket_label(first.bucket),
        end_time: bucket_label(last.bucket),
        duration_buckets: run.len(),
        extreme_value,
        threshold,
        severity: mean_deviation / threshold.max(f64::EPSILON) * bucket_hours(run.len()),
    })
}

fn variability_window(
    cv: f64,
    cv_threshold: f64,
    reading_count: usize,
    profile: &PercentileProfile,
) -> Option<RiskWindow> {
    if reading_count < 2 || cv <= cv_threshold {
        return None;
    }
    let present = profile.present().count();
    Some(RiskWindow {
        kind: RiskKind::HighVariability,
        start_bucket: 0,
        end_bucket: BUCKETS_PER_DAY - 1,
        start_time: bucket_label(0),
        end_time: bucket_label(BUCKETS_PER_DAY - 1),
        duration_buckets: present,
        extreme_value: cv,
        threshold: cv_threshold,
        severity: (cv - cv_threshold) / cv_threshold.max(f64::EPSILON) * bucket_hours(present),
    })
}
