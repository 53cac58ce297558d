use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HydroError;
use crate::series::{EnsembleSeries, EnsembleStats, RETURN_PERIOD_LABELS, ReturnPeriodTable};

/// Forecast timesteps per day (3-hourly).
pub const STEPS_PER_DAY: usize = 8;

/// Reduces equal-length member series to per-timestep statistics.
///
/// Percentiles use lower selection on the ascending values: the element at
/// `floor(p * n)`, never interpolated. `average` is the arithmetic mean.
pub fn members_to_stats(members: &[Vec<f64>]) -> Result<EnsembleStats, HydroError> {
    let Some(first) = members.first() else {
        return Ok(EnsembleStats::default());
    };
    let steps = first.len();
    if let Some((index, member)) = members
        .iter()
        .enumerate()
        .find(|(_, member)| member.len() != steps)
    {
        return Err(HydroError::MalformedArray(format!(
            "member {index} has {} timesteps, expected {steps}",
            member.len()
        )));
    }

    let n = members.len();
    let pick = |fraction: f64| ((fraction * n as f64).floor() as usize).min(n - 1);
    let mut stats = EnsembleStats::with_len(steps);
    let mut values = Vec::with_capacity(n);
    for idx in 0..steps {
        values.clear();
        values.extend(members.iter().map(|member| member[idx]));
        let sum: f64 = values.iter().sum();
        values.sort_by(|a, b| a.total_cmp(b));

        stats.min[idx] = values[0];
        stats.p20[idx] = values[pick(0.20)];
        stats.p25[idx] = values[pick(0.25)];
        stats.median[idx] = values[pick(0.5)];
        stats.p75[idx] = values[pick(0.75)];
        stats.p80[idx] = values[pick(0.80)];
        stats.max[idx] = values[n - 1];
        stats.average[idx] = sum / n as f64;
    }
    Ok(stats)
}

/// Share of members whose daily maximum exceeds each return period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceTable {
    /// First timestamp of every day column.
    pub days: Vec<DateTime<Utc>>,
    /// Return-period label to one percentage (0..=100) per day.
    pub probabilities: BTreeMap<u32, Vec<f64>>,
}

/// Groups each member into days of `steps_per_day` steps, takes the daily
/// maximum, and counts members strictly above each return-period magnitude.
/// Labels missing from the table are skipped.
pub fn exceedance_table(
    forecast: &EnsembleSeries,
    return_periods: &ReturnPeriodTable,
    steps_per_day: usize,
) -> ExceedanceTable {
    let steps_per_day = steps_per_day.max(1);
    let days: Vec<DateTime<Utc>> = forecast
        .datetime
        .iter()
        .step_by(steps_per_day)
        .copied()
        .collect();

    let daily_maxima: Vec<Vec<f64>> = forecast
        .discharge
        .iter()
        .map(|member| {
            (0..days.len())
                .map(|day| {
                    let start = day * steps_per_day;
                    let end = (start + steps_per_day).min(member.len());
                    member
                        .get(start..end)
                        .unwrap_or_default()
                        .iter()
                        .copied()
                        .fold(f64::NEG_INFINITY, f64::max)
                })
                .collect()
        })
        .collect();

    let members = daily_maxima.len();
    let mut probabilities = BTreeMap::new();
    for label in RETURN_PERIOD_LABELS {
        let Some(threshold) = return_periods.get(label) else {
            continue;
        };
        let row = (0..days.len())
            .map(|day| {
                if members == 0 {
                    return 0.0;
                }
                let above = daily_maxima
                    .iter()
                    .filter(|maxima| maxima[day] > threshold)
                    .count();
                above as f64 / members as f64 * 100.0
            })
            .collect();
        probabilities.insert(label, row);
    }

    ExceedanceTable {
        days,
        probabilities,
    }
}
