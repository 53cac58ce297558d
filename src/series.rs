use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RiverId;

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses an ISO-like timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

/// Number of members in a forecast ensemble.
pub const ENSEMBLE_MEMBERS: usize = 51;

/// Return-period labels, in years, reported by every source.
pub const RETURN_PERIOD_LABELS: [u32; 6] = [2, 5, 10, 25, 50, 100];

/// Per-timestep summary of an ensemble.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleStats {
    pub min: Vec<f64>,
    pub p20: Vec<f64>,
    pub p25: Vec<f64>,
    pub median: Vec<f64>,
    pub p75: Vec<f64>,
    pub p80: Vec<f64>,
    pub max: Vec<f64>,
    pub average: Vec<f64>,
}

impl EnsembleStats {
    pub fn with_len(len: usize) -> Self {
        Self {
            min: vec![0.0; len],
            p20: vec![0.0; len],
            p25: vec![0.0; len],
            median: vec![0.0; len],
            p75: vec![0.0; len],
            p80: vec![0.0; len],
            max: vec![0.0; len],
            average: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    /// The eight series in declaration order, paired with their names.
    pub fn named(&self) -> [(&'static str, &[f64]); 8] {
        [
            ("min", &self.min),
            ("p20", &self.p20),
            ("p25", &self.p25),
            ("median", &self.median),
            ("p75", &self.p75),
            ("p80", &self.p80),
            ("max", &self.max),
            ("average", &self.average),
        ]
    }
}

/// Forecast ensemble for one river and initialization date. Bias-corrected
/// forecasts also carry the uncorrected members and their statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSeries {
    pub datetime: Vec<DateTime<Utc>>,
    pub discharge: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharge_original: Option<Vec<Vec<f64>>>,
    pub stats: EnsembleStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_original: Option<EnsembleStats>,
}

impl EnsembleSeries {
    pub fn len(&self) -> usize {
        self.datetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    pub fn member_count(&self) -> usize {
        self.discharge.len()
    }

    pub fn is_bias_corrected(&self) -> bool {
        self.discharge_original.is_some()
    }
}

/// Single simulated discharge series. Missing observations are `None` and
/// are carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrospectiveSeries {
    pub datetime: Vec<DateTime<Utc>>,
    pub discharge: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharge_original: Option<Vec<Option<f64>>>,
}

impl RetrospectiveSeries {
    pub fn new(datetime: Vec<DateTime<Utc>>, discharge: Vec<Option<f64>>) -> Self {
        Self {
            datetime,
            discharge,
            discharge_original: None,
        }
    }

    pub fn len(&self) -> usize {
        self.datetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datetime.is_empty()
    }

    pub fn is_bias_corrected(&self) -> bool {
        self.discharge_original.is_some()
    }

    /// Observed `(timestamp, value)` pairs, skipping missing values.
    pub fn observations(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.datetime
            .iter()
            .zip(self.discharge.iter())
            .filter_map(|(time, value)| value.filter(|v| v.is_finite()).map(|v| (*time, v)))
    }
}

/// Return-period label in years to discharge magnitude in m³/s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnPeriodTable(BTreeMap<u32, f64>);

impl ReturnPeriodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: u32, magnitude: f64) {
        self.0.insert(label, magnitude);
    }

    pub fn get(&self, label: u32) -> Option<f64> {
        self.0.get(&label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.0.iter().map(|(label, value)| (*label, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when magnitudes never decrease as the label grows.
    pub fn is_monotonic(&self) -> bool {
        let values: Vec<f64> = self.0.values().copied().collect();
        values.windows(2).all(|pair| pair[0] <= pair[1])
    }
}

impl FromIterator<(u32, f64)> for ReturnPeriodTable {
    fn from_iter<I: IntoIterator<Item = (u32, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything one report task produces for a river.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiverReportData {
    pub river_id: RiverId,
    pub forecast: EnsembleSeries,
    pub return_periods: ReturnPeriodTable,
}
