
use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{AnalysisConfig, BUCKET_MINUTES, BUCKETS_PER_DAY};

/// Tolerance used when comparing the coverage ratio against its threshold
const RATIO_EPSILON: f64 = 1e-9;
const BUCKET_SECONDS: u32 = BUCKET_MINUTES * 60;

/// A single sensor glucose reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub glucose_mgdl: f64,
}

impl Reading {
    #[inline]
    pub const fn new(timestamp: NaiveDateTime, glucose_mgdl: f64) -> Self {
        Self {
            timestamp,
            glucose_mgdl,
        }
    }
}

/// Data shortfalls that make a profile indicative only
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficientDataError {
    #[error("only {found} valid days of data (at least {required} required); profile is indicative only")]
    TooFewDays { found: usize, required: usize },
    #[error(
        "sensor coverage {:.1}% is below the required {:.0}%; profile is indicative only",
        .ratio * 100.0,
        .required * 100.0
    )]
    LowCoverage { ratio: f64, required: f64 },
}

/// One calendar day snapped onto the bucket grid
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedDay {
    pub date: NaiveDate,
    /// Averaged glucose per bucket, `None` where no reading landed
    pub buckets: Vec<Option<f64>>,
    pub filled: usize,
    /// Every finite reading of the day in timestamp order
    pub readings: Vec<Reading>,
}

impl AlignedDay {
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.filled as f64 / BUCKETS_PER_DAY as f64
    }

    /// Filled bucket averages in time-of-day order
    #[inline]
    pub fn bucket_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.buckets.iter().filter_map(|v| *v)
    }

    /// Raw glucose values in timestamp order
    #[inline]
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.readings.iter().map(|r| r.glucose_mgdl)
    }
}

/// A day excluded from aggregation for low fill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedDay {
    pub date: NaiveDate,
    pub filled_buckets: usize,
    pub fill_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sufficiency {
    pub sufficient: bool,
    pub valid_days: usize,
    pub coverage_ratio: f64,
    pub shortfalls: Vec<InsufficientDataError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Valid days in date order
    pub days: Vec<AlignedDay>,
    pub rejected_days: Vec<RejectedDay>,
    pub total_readings: usize,
    pub sufficiency: Sufficiency,
}

impl Alignment {
    /// First unmet sufficiency requirement, if any
    #[inline]
    pub fn check_sufficiency(&self) -> Result<(), InsufficientDataError> {
        self.sufficiency
            .shortfalls
            .first()
            .map_or(Ok(()), |shortfall| Err(shortfall.clone()))
    }

    /// Every raw reading of the valid days in chronological order
    #[inline]
    pub fn valid_readings(&self) -> impl Iterator<Item = &Reading> + '_ {
        self.days.iter().flat_map(|d| d.readings.iter())
    }

    /// Raw glucose values of the valid days in chronological order
    #[inline]
    pub fn chronological_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.days.iter().flat_map(AlignedDay::values)
    }

    #[inline]
    pub fn summary(&self) -> AlignmentSummary {
        AlignmentSummary {
            total_readings: self.total_readings,
            valid_days: self.days.len(),
            first_day: self.days.first().map(|d| d.date),
            last_day: self.days.last().map(|d| d.date),
            rejected_days: self.rejected_days.clone(),
            coverage_ratio: self.sufficiency.coverage_ratio,
            sufficient: self.sufficiency.sufficient,
        }
    }
}

/// Serialisable view of an alignment without the per-day bucket grids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentSummary {
    pub total_readings: usize,
    pub valid_days: usize,
    pub first_day: Option<NaiveDate>,
    pub last_day: Option<NaiveDate>,
    pub rejected_days: Vec<RejectedDay>,
    pub coverage_ratio: f64,
    pub sufficient: bool,
}

/// Bucket index of a time of day, snapped to the nearest five-minute boundary
///
/// Times in the last half bucket before midnight stay in the final bucket of
/// their own day.
#[inline]
pub fn bucket_index(time: NaiveTime) -> usize {
    let seconds = time.num_seconds_from_midnight();
    let index = (seconds + BUCKET_SECONDS / 2) / BUCKET_SECONDS;
    (index as usize).min(BUCKETS_PER_DAY - 1)
}

/// `HH:MM` label of a bucket's start time
#[inline]
pub fn bucket_label(index: usize) -> String {
    let minutes = index.min(BUCKETS_PER_DAY - 1) * BUCKET_MINUTES as usize;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Snap readings onto the daily bucket grid and judge data sufficiency
#[inline]
pub fn align_readings(readings: &[Reading], config: &AnalysisConfig) -> Alignment {
    let mut per_day: BTreeMap<NaiveDate, (Vec<Vec<f64>>, Vec<Reading>)> = BTreeMap::new();
    let mut total_readings = 0_usize;

    for reading in readings {
        if !reading.glucose_mgdl.is_finite() {
            continue;
        }
        let (slots, raw) = per_day
            .entry(reading.timestamp.date())
            .or_insert_with(|| (vec![Vec::new(); BUCKETS_PER_DAY], Vec::new()));
        if let Some(slot) = slots.get_mut(bucket_index(reading.timestamp.time())) {
            slot.push(reading.glucose_mgdl);
            raw.push(*reading);
            total_readings += 1;
        }
    }

    let min_filled = config.min_day_fill_ratio * BUCKETS_PER_DAY as f64;
    let mut days = Vec::new();
    let mut rejected_days = Vec::new();

    for (date, (slots, mut raw)) in per_day {
        let buckets: Vec<Option<f64>> = slots.into_iter().map(average_slot).collect();
        let filled = buckets.iter().filter(|b| b.is_some()).count();

        if (filled as f64) + RATIO_EPSILON < min_filled {
            debug!("Rejecting {date}: {filled} of {BUCKETS_PER_DAY} buckets filled");
            rejected_days.push(RejectedDay {
                date,
                filled_buckets: filled,
                fill_ratio: filled as f64 / BUCKETS_PER_DAY as f64,
            });
        } else {
            raw.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then(a.glucose_mgdl.total_cmp(&b.glucose_mgdl))
            });
            days.push(AlignedDay {
                date,
                buckets,
                filled,
                readings: raw,
            });
        }
    }

    let filled_slots: usize = days.iter().map(|d| d.filled).sum();
    let coverage_ratio = if days.is_empty() {
        0.0
    } else {
        filled_slots as f64 / (days.len() * BUCKETS_PER_DAY) as f64
    };

    let sufficiency = evaluate_sufficiency(days.len(), coverage_ratio, config);
    for shortfall in &sufficiency.shortfalls {
        warn!("{shortfall}");
    }

    Alignment {
        days,
        rejected_days,
        total_readings,
        sufficiency,
    }
}

/// Apply the day-count and coverage thresholds
#[inline]
pub fn evaluate_sufficiency(
    valid_days: usize,
    coverage_ratio: f64,
    config: &AnalysisConfig,
) -> Sufficiency {
    let mut shortfalls = Vec::new();

    if valid_days < config.min_days {
        shortfalls.push(InsufficientDataError::TooFewDays {
            found: valid_days,
            required: config.min_days,
        });
    }
    if coverage_ratio + RATIO_EPSILON < config.min_coverage_ratio {
        shortfalls.push(InsufficientDataError::LowCoverage {
            ratio: coverage_ratio,
            required: config.min_coverage_ratio,
        });
    }

    Sufficiency {
        sufficient: shortfalls.is_empty(),
        valid_days,
        coverage_ratio,
        shortfalls,
    }
}

/// Mean of a bucket's readings, summed in sorted order so the result does not
/// depend on input order
fn average_slot(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
