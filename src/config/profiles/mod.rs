//! Built-in patient profiles
//!
//! A profile fixes the clinical target range and the five glucose bands used
//! for band percentages and the Glycemia Risk Index.


use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProfileKind {
    #[default]
    #[serde(rename = "T1DM")]
    T1dm,
    #[serde(rename = "T2DM")]
    T2dm,
    #[serde(rename = "GDM")]
    Gdm,
    #[serde(rename = "Pregnancy_T1D")]
    PregnancyT1d,
    #[serde(rename = "Pregnancy_T2D")]
    PregnancyT2d,
}

impl ProfileKind {
    pub const ALL: [Self; 5] = [
        Self::T1dm,
        Self::T2dm,
        Self::Gdm,
        Self::PregnancyT1d,
        Self::PregnancyT2d,
    ];

    #[inline]
    pub fn key(self) -> &'static str {
        match self {
            Self::T1dm => "T1DM",
            Self::T2dm => "T2DM",
            Self::Gdm => "GDM",
            Self::PregnancyT1d => "Pregnancy_T1D",
            Self::PregnancyT2d => "Pregnancy_T2D",
        }
    }

    #[inline]
    pub fn profile(self) -> PatientProfile {
        PatientProfile::for_kind(self)
    }
}

impl fmt::Display for ProfileKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown profile '{0}' (expected one of T1DM, T2DM, GDM, Pregnancy_T1D, Pregnancy_T2D)")]
pub struct UnknownProfile(pub String);

impl FromStr for ProfileKind {
    type Err = UnknownProfile;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownProfile(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandKind {
    VeryLow,
    Low,
    InRange,
    High,
    VeryHigh,
}

/// A glucose interval with explicit bound inclusivity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlucoseBand {
    pub kind: BandKind,
    pub label: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub include_lower: bool,
    pub include_upper: bool,
}

impl GlucoseBand {
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        let above_min = self.min.is_none_or(|min| {
            if self.include_lower {
                value >= min
            } else {
                value > min
            }
        });
        let below_max = self.max.is_none_or(|max| {
            if self.include_upper {
                value <= max
            } else {
                value < max
            }
        });
        above_min && below_max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientProfile {
    pub kind: ProfileKind,
    pub display_name: &'static str,
    pub target_range: (f64, f64),
    pub bands: [GlucoseBand; 5],
    pub targets_summary: &'static str,
}

impl PatientProfile {
    #[inline]
    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::T1dm => Self::standard(kind, "Type 1 diabetes"),
            ProfileKind::T2dm => Self::standard(kind, "Type 2 diabetes"),
            ProfileKind::Gdm => Self::pregnancy(kind, "Gestational diabetes"),
            ProfileKind::PregnancyT1d => Self::pregnancy(kind, "Pregnancy with type 1 diabetes"),
            ProfileKind::PregnancyT2d => Self::pregnancy(kind, "Pregnancy with type 2 diabetes"),
        }
    }

    fn standard(kind: ProfileKind, display_name: &'static str) -> Self {
        Self {
            kind,
            display_name,
            target_range: (70.0, 180.0),
            bands: [
                band(BandKind::VeryLow, "Very low (<54 mg/dL)", None, Some(54.0), true, false),
                band(BandKind::Low, "Low (54-69 mg/dL)", Some(54.0), Some(70.0), true, false),
                band(BandKind::InRange, "In range (70-180 mg/dL)", Some(70.0), Some(180.0), true, true),
                band(BandKind::High, "High (181-250 mg/dL)", Some(180.0), Some(250.0), false, true),
                band(BandKind::VeryHigh, "Very high (>250 mg/dL)", Some(250.0), None, false, true),
            ],
            targets_summary: "TIR 70-180 mg/dL >70%; <70 mg/dL <4%; <54 mg/dL <1%; >180 mg/dL <25%; >250 mg/dL <5%",
        }
    }

    fn pregnancy(kind: ProfileKind, display_name: &'static str) -> Self {
        Self {
            kind,
            display_name,
            target_range: (63.0, 140.0),
            bands: [
                band(BandKind::VeryLow, "Very low (<54 mg/dL)", None, Some(54.0), true, false),
                band(BandKind::Low, "Below target (54-62 mg/dL)", Some(54.0), Some(63.0), true, false),
                band(BandKind::InRange, "In range (63-140 mg/dL)", Some(63.0), Some(140.0), true, true),
                band(BandKind::High, "Above target (141-160 mg/dL)", Some(140.0), Some(160.0), false, true),
                band(BandKind::VeryHigh, "Very high (>160 mg/dL)", Some(160.0), None, false, true),
            ],
            targets_summary: "TIR 63-140 mg/dL >70%; <63 mg/dL <4%; <54 mg/dL <1%; >140 mg/dL <25%",
        }
    }

    /// Band for a given glucose value; every positive value falls in exactly one band
    #[inline]
    pub fn band_for(&self, value: f64) -> Option<&GlucoseBand> {
        self.bands.iter().find(|b| b.contains(value))
    }
}

const fn band(
    kind: BandKind,
    label: &'static str,
    min: Option<f64>,
    max: Option<f64>,
    include_lower: bool,
    include_upper: bool,
) -> GlucoseBand {
    GlucoseBand {
        kind,
        label,
        min,
        max,
        include_lower,
        include_upper,
    }
}
