use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{DatasetRequest, DatasetTarget};

/// Hours subtracted from "now" before truncating to the UTC day for
/// latest-retrospective keys; the daily dataset lands around midday UTC.
pub const RETROSPECTIVE_LAG_HOURS: i64 = 12;

/// Bucket used for return periods, which do not vary within a session.
pub const STATIC_BUCKET: &str = "static";

/// Stable cache key: `riverId_kind_corrected_bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn cache_key(request: &DatasetRequest) -> CacheKey {
    cache_key_at(request, Utc::now())
}

/// Derives the key against an explicit clock reading.
pub fn cache_key_at(request: &DatasetRequest, now: DateTime<Utc>) -> CacheKey {
    let bucket = temporal_bucket(&request.target, now);
    CacheKey(format!(
        "{}_{}_{}_{}",
        request.river_id,
        request.kind().as_str(),
        request.corrected,
        bucket
    ))
}

fn temporal_bucket(target: &DatasetTarget, now: DateTime<Utc>) -> String {
    match target {
        DatasetTarget::Forecast(date) => date.as_str().to_string(),
        DatasetTarget::Retrospective => (now - Duration::hours(RETROSPECTIVE_LAG_HOURS))
            .format("%Y%m%d")
            .to_string(),
        DatasetTarget::ReturnPeriods => STATIC_BUCKET.to_string(),
    }
}
