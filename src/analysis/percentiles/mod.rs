#[cfg(test)]
mod tests;

use serde::Serialize;

use super::alignment::{Alignment, bucket_label};
use super::BUCKETS_PER_DAY;

/// Percentile levels reported per bucket
pub const PERCENTILE_LEVELS: [f64; 5] = [0.05, 0.25, 0.50, 0.75, 0.95];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Percentiles {
    /// Interquartile range width (P75 - P25)
    #[inline]
    pub fn iqr(&self) -> f64 {
        self.p75 - self.p25
    }

    /// Interdecile range width as used by AGP reports (P95 - P5)
    #[inline]
    pub fn idr(&self) -> f64 {
        self.p95 - self.p5
    }

    /// Percentiles of an ascending sorted sample; `None` when empty
    #[inline]
    pub fn from_sorted(sorted: &[f64]) -> Option<Self> {
        let [p5, p25, p50, p75, p95] =
            PERCENTILE_LEVELS.map(|q| interpolated_percentile(sorted, q));
        Some(Self {
            p5: p5?,
            p25: p25?,
            p50: p50?,
            p75: p75?,
            p95: p95?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketProfile {
    pub bucket: usize,
    pub time: String,
    pub sample_count: usize,
    /// `None` marks a missing bucket
    pub percentiles: Option<Percentiles>,
}

impl BucketProfile {
    #[inline]
    pub const fn is_missing(&self) -> bool {
        self.sample_count == 0
    }
}

/// Per-bucket percentile statistics across all valid days
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileProfile {
    pub buckets: Vec<BucketProfile>,
}

impl PercentileProfile {
    #[inline]
    pub fn missing_count(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_missing()).count()
    }

    #[inline]
    pub fn missing_ratio(&self) -> f64 {
        if self.buckets.is_empty() {
            return 1.0;
        }
        self.missing_count() as f64 / self.buckets.len() as f64
    }

    /// Buckets that carry percentiles, with their index
    #[inline]
    pub fn present(&self) -> impl Iterator<Item = (usize, &Percentiles)> + '_ {
        self.buckets
            .iter()
            .filter_map(|b| b.percentiles.as_ref().map(|p| (b.bucket, p)))
    }

    #[inline]
    pub fn get(&self, bucket: usize) -> Option<&Percentiles> {
        self.buckets.get(bucket).and_then(|b| b.percentiles.as_ref())
    }
}

/// Sorted raw values per bucket across valid days
#[derive(Debug, Clone, PartialEq)]
pub struct BucketValues {
    values: Vec<Vec<f64>>,
}

impl BucketValues {
    #[inline]
    pub fn bucket(&self, index: usize) -> &[f64] {
        self.values.get(index).map_or(&[], Vec::as_slice)
    }

    #[inline]
    pub fn sample_count(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }
}

/// Gather every valid day's value for each bucket, sorted ascending
#[inline]
pub fn collect_bucket_values(alignment: &Alignment) -> BucketValues {
    let mut values = vec![Vec::with_capacity(alignment.days.len()); BUCKETS_PER_DAY];
    for day in &alignment.days {
        for (slot, value) in values.iter_mut().zip(&day.buckets) {
            if let Some(v) = value {
                slot.push(*v);
            }
        }
    }
    for slot in &mut values {
        slot.sort_by(f64::total_cmp);
    }
    BucketValues { values }
}

#[inline]
pub fn aggregate_percentiles(values: &BucketValues) -> PercentileProfile {
    let buckets = (0..BUCKETS_PER_DAY)
        .map(|bucket| {
            let sorted = values.bucket(bucket);
            BucketProfile {
                bucket,
                time: bucket_label(bucket),
                sample_count: sorted.len(),
                percentiles: Percentiles::from_sorted(sorted),
            }
        })
        .collect();
    PercentileProfile { buckets }
}

/// Linear interpolation between closest ranks at rank `q * (n - 1)`
#[inline]
pub fn interpolated_percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = q.clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor();
    let fraction = rank - lower;
    let lower_index = (lower as usize).min(last);
    let upper_index = (lower_index + 1).min(last);

    let low = *sorted.get(lower_index)?;
    let high = *sorted.get(upper_index)?;
    Some((high - low).mul_add(fraction, low))
}
