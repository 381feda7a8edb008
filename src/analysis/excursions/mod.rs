//! Day-level and hour-level breakdowns of the raw readings
//!
//! The per-day breakdown repeats the range fractions and band shares for each
//! valid calendar day. Excursion distributions count readings past the fixed
//! hypo/hyper thresholds by calendar date and by hour of day.


use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, Timelike};
use serde::Serialize;

use super::alignment::Alignment;
use super::risk::{BandShare, band_shares, range_fractions};
use crate::config::PatientProfile;

pub const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcursionKind {
    /// Below 70 mg/dL
    Low,
    /// Below 54 mg/dL
    VeryLow,
    /// Above 180 mg/dL
    High,
    /// Above 250 mg/dL
    VeryHigh,
}

impl ExcursionKind {
    pub const ALL: [Self; 4] = [Self::Low, Self::VeryLow, Self::High, Self::VeryHigh];

    #[inline]
    pub const fn threshold(self) -> f64 {
        match self {
            Self::Low => 70.0,
            Self::VeryLow => 54.0,
            Self::High => 180.0,
            Self::VeryHigh => 250.0,
        }
    }

    /// Strictly beyond the threshold
    #[inline]
    pub fn matches(self, glucose: f64) -> bool {
        match self {
            Self::Low | Self::VeryLow => glucose < self.threshold(),
            Self::High | Self::VeryHigh => glucose > self.threshold(),
        }
    }

    #[inline]
    pub const fn is_hypo(self) -> bool {
        matches!(self, Self::Low | Self::VeryLow)
    }
}

impl fmt::Display for ExcursionKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.is_hypo() { "below" } else { "above" };
        write!(f, "{} {:.0} mg/dL", direction, self.threshold())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Readings past one threshold, spread over dates and hours
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcursionDistribution {
    pub kind: ExcursionKind,
    pub threshold: f64,
    pub count: usize,
    /// Share of all valid readings
    pub fraction: f64,
    /// Counts per hour of day, index 0 is 00:00-00:59
    pub by_hour: Vec<usize>,
    /// Only dates with at least one matching reading, in date order
    pub by_date: Vec<DateCount>,
    /// Earliest hour with the most matching readings
    pub peak_hour: Option<u32>,
}

impl ExcursionDistribution {
    #[inline]
    pub fn peak_hour_label(&self) -> Option<String> {
        self.peak_hour.map(|h| format!("{h:02}:00-{h:02}:59"))
    }

    /// One-line summary, `None` when nothing crossed the threshold
    #[inline]
    pub fn describe(&self) -> Option<String> {
        let peak = self.peak_hour_label()?;
        Some(format!(
            "{} readings {} ({:.1}%) on {} days, most often {}",
            self.count,
            self.kind,
            self.fraction * 100.0,
            self.by_date.len(),
            peak
        ))
    }
}

/// Range fractions and band shares of one valid day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub reading_count: usize,
    pub tbr: f64,
    pub tir: f64,
    pub tar: f64,
    pub bands: Vec<BandShare>,
}

impl DailyBreakdown {
    #[inline]
    pub fn describe(&self) -> String {
        format!(
            "{}: TIR {:.0}%, TBR {:.0}%, TAR {:.0}%",
            self.date,
            self.tir * 100.0,
            self.tbr * 100.0,
            self.tar * 100.0
        )
    }
}

/// Days below the time-in-range target, worst first, ties in date order
#[inline]
pub fn days_below_target(
    daily: &[DailyBreakdown],
    tir_target: f64,
    limit: usize,
) -> Vec<&DailyBreakdown> {
    let mut days: Vec<&DailyBreakdown> = daily.iter().filter(|d| d.tir < tir_target).collect();
    days.sort_by(|a, b| a.tir.total_cmp(&b.tir).then(a.date.cmp(&b.date)));
    days.truncate(limit);
    days
}

#[inline]
pub fn daily_breakdown(
    alignment: &Alignment,
    target_range: (f64, f64),
    patient: &PatientProfile,
) -> Vec<DailyBreakdown> {
    let (low, high) = target_range;
    alignment
        .days
        .iter()
        .map(|day| {
            let values: Vec<f64> = day.values().collect();
            let (tbr, tir, tar) = range_fractions(&values, low, high);
            DailyBreakdown {
                date: day.date,
                reading_count: values.len(),
                tbr,
                tir,
                tar,
                bands: band_shares(&values, patient),
            }
        })
        .collect()
}

#[inline]
pub fn excursion_distributions(alignment: &Alignment) -> Vec<ExcursionDistribution> {
    let total = alignment.valid_readings().count();

    ExcursionKind::ALL
        .into_iter()
        .map(|kind| {
            let mut by_hour = vec![0_usize; HOURS_PER_DAY];
            let mut by_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();

            for reading in alignment.valid_readings() {
                if !kind.matches(reading.glucose_mgdl) {
                    continue;
                }
                if let Some(slot) = by_hour.get_mut(reading.timestamp.hour() as usize) {
                    *slot += 1;
                }
                *by_date.entry(reading.timestamp.date()).or_default() += 1;
            }

            let count: usize = by_hour.iter().sum();
            let peak_hour = by_hour
                .iter()
                .enumerate()
                .filter(|&(_, &n)| n > 0)
                .fold(None, |best: Option<(usize, usize)>, (hour, &n)| match best {
                    Some((_, best_n)) if best_n >= n => best,
                    _ => Some((hour, n)),
                })
                .and_then(|(hour, _)| u32::try_from(hour).ok());

            ExcursionDistribution {
                kind,
                threshold: kind.threshold(),
                count,
                fraction: if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64
                },
                by_hour,
                by_date: by_date
                    .into_iter()
                    .map(|(date, count)| DateCount { date, count })
                    .collect(),
                peak_hour,
            }
        })
        .collect()
}
