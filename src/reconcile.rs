//! Normalizes bias-corrected REST payloads into the canonical series shapes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::RiverId;
use crate::ensemble::members_to_stats;
use crate::error::HydroError;
use crate::series::{ENSEMBLE_MEMBERS, EnsembleSeries, RetrospectiveSeries, parse_timestamp};

/// Name of the `n`th (1-based) ensemble member array.
pub fn member_key(n: usize) -> String {
    format!("ensemble_{n:02}")
}

/// Aligns a bias-corrected forecast payload.
///
/// Sentinel positions are taken from the first corrected member only and
/// dropped from the time axis and from every corrected and original member.
pub fn reconcile_forecast(payload: &Value) -> Result<EnsembleSeries, HydroError> {
    let object = as_object(payload)?;
    let keys: Vec<String> = (1..=ENSEMBLE_MEMBERS).map(member_key).collect();
    for key in &keys {
        require_array(object, key)?;
        require_array(object, &format!("{key}_original"))?;
    }

    let sentinels = sentinel_indices(require_array(object, &keys[0])?);
    let datetime: Vec<DateTime<Utc>> = parse_datetimes(require_array(object, "datetime")?)?
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !sentinels.contains(idx))
        .map(|(_, time)| time)
        .collect();

    let mut discharge = Vec::with_capacity(keys.len());
    let mut discharge_original = Vec::with_capacity(keys.len());
    for key in &keys {
        discharge.push(retain_valid(object, key, &sentinels, datetime.len())?);
        discharge_original.push(retain_valid(
            object,
            &format!("{key}_original"),
            &sentinels,
            datetime.len(),
        )?);
    }

    let stats = members_to_stats(&discharge)?;
    let stats_original = members_to_stats(&discharge_original)?;
    Ok(EnsembleSeries {
        datetime,
        discharge,
        discharge_original: Some(discharge_original),
        stats,
        stats_original: Some(stats_original),
    })
}

/// Renames the `{riverId}` and `{riverId}_original` arrays of a
/// bias-corrected retrospective payload. Missing values pass through as
/// `None`; no positions are dropped.
pub fn reconcile_retrospective(
    payload: &Value,
    river_id: RiverId,
) -> Result<RetrospectiveSeries, HydroError> {
    let object = as_object(payload)?;
    let datetime = parse_datetimes(require_array(object, "datetime")?)?;
    let corrected_key = river_id.to_string();
    let original_key = format!("{river_id}_original");
    let discharge = optional_values(require_array(object, &corrected_key)?, &corrected_key)?;
    let original = optional_values(require_array(object, &original_key)?, &original_key)?;

    for (key, len) in [(&corrected_key, discharge.len()), (&original_key, original.len())] {
        if len != datetime.len() {
            return Err(HydroError::MalformedResponse(format!(
                "'{key}' has {len} values for {} timestamps",
                datetime.len()
            )));
        }
    }

    Ok(RetrospectiveSeries {
        datetime,
        discharge,
        discharge_original: Some(original),
    })
}

/// Positions holding the empty-value sentinel.
pub fn sentinel_indices(values: &[Value]) -> BTreeSet<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| is_sentinel(value))
        .map(|(idx, _)| idx)
        .collect()
}

fn is_sentinel(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, HydroError> {
    payload
        .as_object()
        .ok_or_else(|| HydroError::MalformedResponse("expected a JSON object".to_string()))
}

fn require_array<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], HydroError> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| HydroError::MalformedResponse(format!("key '{key}' not found")))
}

fn parse_datetimes(values: &[Value]) -> Result<Vec<DateTime<Utc>>, HydroError> {
    values
        .iter()
        .map(|value| {
            value.as_str().and_then(parse_timestamp).ok_or_else(|| {
                HydroError::MalformedResponse(format!("invalid timestamp {value}"))
            })
        })
        .collect()
}

fn retain_valid(
    object: &Map<String, Value>,
    key: &str,
    sentinels: &BTreeSet<usize>,
    expected: usize,
) -> Result<Vec<f64>, HydroError> {
    let values = require_array(object, key)?;
    let kept: Vec<f64> = values
        .iter()
        .enumerate()
        .filter(|(idx, _)| !sentinels.contains(idx))
        .map(|(idx, value)| {
            number(value).ok_or_else(|| {
                HydroError::MalformedResponse(format!("'{key}' has no value at index {idx}"))
            })
        })
        .collect::<Result<_, _>>()?;
    if kept.len() != expected {
        return Err(HydroError::MalformedResponse(format!(
            "'{key}' has {} values for {expected} timestamps",
            kept.len()
        )));
    }
    Ok(kept)
}

fn optional_values(values: &[Value], key: &str) -> Result<Vec<Option<f64>>, HydroError> {
    values
        .iter()
        .map(|value| {
            if is_sentinel(value) {
                Ok(None)
            } else {
                number(value).map(Some).ok_or_else(|| {
                    HydroError::MalformedResponse(format!("'{key}' holds non-numeric {value}"))
                })
            }
        })
        .collect()
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
