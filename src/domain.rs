use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HydroError;

static FORECAST_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiverId(u64);

impl RiverId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RiverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RiverId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for RiverId {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(HydroError::InvalidRiverId(value.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| HydroError::InvalidRiverId(value.to_string()))
    }
}

/// Forecast initialization date in `YYYYMMDD` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ForecastDate(String);

impl ForecastDate {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date.format("%Y%m%d").to_string())
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y%m%d").ok()
    }
}

impl fmt::Display for ForecastDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ForecastDate {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // accept the ISO form a date picker produces
        let normalized = value.trim().replace('-', "");
        if !FORECAST_DATE_RE.is_match(&normalized) {
            return Err(HydroError::InvalidDate(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for ForecastDate {
    type Error = HydroError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ForecastDate> for String {
    fn from(value: ForecastDate) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatasetKind {
    Forecast,
    Retrospective,
    ReturnPeriods,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Forecast => "forecast",
            DatasetKind::Retrospective => "retro",
            DatasetKind::ReturnPeriods => "returnPeriods",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RetroResolution {
    Hourly,
    #[default]
    Daily,
    Monthly,
    Yearly,
    Maximums,
}

impl RetroResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetroResolution::Hourly => "hourly",
            RetroResolution::Daily => "daily",
            RetroResolution::Monthly => "monthly",
            RetroResolution::Yearly => "yearly",
            RetroResolution::Maximums => "maximums",
        }
    }
}

impl fmt::Display for RetroResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetroResolution {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "hourly" => Ok(RetroResolution::Hourly),
            "daily" => Ok(RetroResolution::Daily),
            "monthly" => Ok(RetroResolution::Monthly),
            "yearly" => Ok(RetroResolution::Yearly),
            "maximums" => Ok(RetroResolution::Maximums),
            _ => Err(HydroError::InvalidResolution(value.to_string())),
        }
    }
}

/// What a [`DatasetRequest`] asks for. Forecasts carry their initialization
/// date, so a dateless forecast request cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatasetTarget {
    Forecast(ForecastDate),
    Retrospective,
    ReturnPeriods,
}

/// Identity of one cached dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRequest {
    pub river_id: RiverId,
    pub corrected: bool,
    pub target: DatasetTarget,
}

impl DatasetRequest {
    pub fn forecast(river_id: RiverId, date: ForecastDate, corrected: bool) -> Self {
        Self {
            river_id,
            corrected,
            target: DatasetTarget::Forecast(date),
        }
    }

    pub fn retrospective(river_id: RiverId, corrected: bool) -> Self {
        Self {
            river_id,
            corrected,
            target: DatasetTarget::Retrospective,
        }
    }

    pub fn return_periods(river_id: RiverId, corrected: bool) -> Self {
        Self {
            river_id,
            corrected,
            target: DatasetTarget::ReturnPeriods,
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match self.target {
            DatasetTarget::Forecast(_) => DatasetKind::Forecast,
            DatasetTarget::Retrospective => DatasetKind::Retrospective,
            DatasetTarget::ReturnPeriods => DatasetKind::ReturnPeriods,
        }
    }

    pub fn date(&self) -> Option<&ForecastDate> {
        match &self.target {
            DatasetTarget::Forecast(date) => Some(date),
            _ => None,
        }
    }
}
