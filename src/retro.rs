//! Statistics derived from a daily retrospective series.
//!
//! Every function here except [`analyze`], which reads the clock, is a pure
//! transformation of its input. Missing
//! values are skipped unless stated otherwise.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::series::RetrospectiveSeries;

/// Monthly buckets with fewer samples are left out of monthly averages.
pub const MIN_MONTHLY_SAMPLES: usize = 20;
pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const SECONDS_PER_YEAR: f64 = SECONDS_PER_DAY * 365.25;
pub const STATUS_PERCENTILES: [u32; 5] = [0, 13, 28, 72, 87];
pub const STATUS_LABELS: [&str; 5] = ["very wet", "wet", "normal", "dry", "very dry"];
/// Peaks closer than this to the seasonal median are never outliers.
pub const OUTLIER_FLOOR_DAYS: f64 = 30.0;
pub const RASTER_DAYS: usize = 366;

const DAYS_PER_CIRCLE: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FdcPoint {
    pub percentile: u32,
    pub discharge: f64,
}

/// Samples an ascending slice at percentiles 100, 98, ..., 0. The index for
/// `p` is `floor(n * p / 100)`, minus one at `p = 100`.
pub fn sorted_to_percentiles(ascending: &[f64]) -> Vec<FdcPoint> {
    let n = ascending.len();
    if n == 0 {
        return Vec::new();
    }
    (0..=100u32)
        .rev()
        .step_by(2)
        .map(|percentile| {
            let mut idx = n * percentile as usize / 100;
            if percentile == 100 {
                idx -= 1;
            }
            FdcPoint {
                percentile,
                discharge: ascending[idx.min(n - 1)],
            }
        })
        .collect()
}

/// Flow-duration curve of the whole series.
pub fn flow_duration_curve(series: &RetrospectiveSeries) -> Vec<FdcPoint> {
    let mut values: Vec<f64> = series.observations().map(|(_, value)| value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    sorted_to_percentiles(&values)
}

/// Daily values grouped by `(year, month)`, dropping buckets with fewer
/// than [`MIN_MONTHLY_SAMPLES`] values.
pub fn monthly_buckets(series: &RetrospectiveSeries) -> BTreeMap<(i32, u32), Vec<f64>> {
    let mut buckets: BTreeMap<(i32, u32), Vec<f64>> = BTreeMap::new();
    for (time, value) in series.observations() {
        buckets
            .entry((time.year(), time.month()))
            .or_default()
            .push(value);
    }
    buckets.retain(|_, values| values.len() >= MIN_MONTHLY_SAMPLES);
    buckets
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAverage {
    pub year: i32,
    pub month: u32,
    pub value: f64,
}

pub fn monthly_average_timeseries(
    buckets: &BTreeMap<(i32, u32), Vec<f64>>,
) -> Vec<MonthlyAverage> {
    buckets
        .iter()
        .map(|((year, month), values)| MonthlyAverage {
            year: *year,
            month: *month,
            value: mean(values),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyMean {
    pub month: u32,
    pub value: Option<f64>,
}

/// Mean of the year-month bucket means for each calendar month.
pub fn monthly_means(averages: &[MonthlyAverage]) -> Vec<MonthlyMean> {
    (1..=12)
        .map(|month| {
            let means: Vec<f64> = averages
                .iter()
                .filter(|average| average.month == month)
                .map(|average| average.value)
                .collect();
            MonthlyMean {
                month,
                value: (!means.is_empty()).then(|| mean(&means)),
            }
        })
        .collect()
}

/// All retained values of one calendar month, pooled across years and
/// sorted descending.
fn pooled_month(buckets: &BTreeMap<(i32, u32), Vec<f64>>, month: u32) -> Vec<f64> {
    let mut values: Vec<f64> = buckets
        .iter()
        .filter(|((_, bucket_month), _)| *bucket_month == month)
        .flat_map(|(_, values)| values.iter().copied())
        .collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyFdc {
    pub month: u32,
    pub curve: Vec<FdcPoint>,
}

pub fn monthly_flow_duration_curves(buckets: &BTreeMap<(i32, u32), Vec<f64>>) -> Vec<MonthlyFdc> {
    (1..=12)
        .map(|month| {
            let mut values = pooled_month(buckets, month);
            values.reverse();
            MonthlyFdc {
                month,
                curve: sorted_to_percentiles(&values),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBand {
    pub label: &'static str,
    pub percentile: u32,
    /// One threshold per calendar month, January first.
    pub values: Vec<Option<f64>>,
}

/// Thresholds classifying how wet or dry a month is against history.
pub fn status_bands(buckets: &BTreeMap<(i32, u32), Vec<f64>>) -> Vec<StatusBand> {
    let pooled: Vec<Vec<f64>> = (1..=12).map(|month| pooled_month(buckets, month)).collect();
    STATUS_PERCENTILES
        .iter()
        .zip(STATUS_LABELS)
        .map(|(percentile, label)| StatusBand {
            label,
            percentile: *percentile,
            values: pooled
                .iter()
                .map(|values| {
                    let idx = values.len() * *percentile as usize / 100;
                    values.get(idx).copied()
                })
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyPeak {
    pub year: i32,
    pub date: DateTime<Utc>,
    pub day_of_year: u32,
    pub peak: f64,
}

/// Largest daily value of each year; the earliest day wins ties.
pub fn yearly_peaks(series: &RetrospectiveSeries) -> Vec<YearlyPeak> {
    let mut peaks: BTreeMap<i32, YearlyPeak> = BTreeMap::new();
    for (date, value) in series.observations() {
        let year = date.year();
        let replace = peaks.get(&year).is_none_or(|current| value > current.peak);
        if replace {
            peaks.insert(
                year,
                YearlyPeak {
                    year,
                    date,
                    day_of_year: date.ordinal(),
                    peak: value,
                },
            );
        }
    }
    peaks.into_values().collect()
}

fn day_to_angle(day_of_year: u32) -> f64 {
    2.0 * PI * (f64::from(day_of_year) - 1.0) / DAYS_PER_CIRCLE
}

/// Shortest distance between two angles on the circle.
pub fn circular_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs();
    diff.min(2.0 * PI - diff)
}

/// The sample angle with the smallest summed distance to all others. The
/// first minimum found wins.
pub fn circular_median(angles: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, f64)> = None;
    for candidate in angles {
        let total: f64 = angles
            .iter()
            .map(|angle| circular_distance(*angle, *candidate))
            .sum();
        if best.is_none_or(|(_, best_total)| total < best_total) {
            best = Some((*candidate, total));
        }
    }
    best.map(|(angle, _)| angle)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakTimingPoint {
    pub year: i32,
    pub day_of_year: u32,
    pub peak: f64,
    pub distance_days: f64,
    pub outlier: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakTiming {
    pub median_day_of_year: u32,
    /// `Q3 + 1.5 * IQR` of the distances, in days.
    pub threshold_days: f64,
    pub points: Vec<PeakTimingPoint>,
}

/// Seasonal timing of annual peaks. A year is an outlier when its distance
/// from the circular median exceeds both the IQR threshold and
/// [`OUTLIER_FLOOR_DAYS`].
pub fn peak_timing(peaks: &[YearlyPeak]) -> Option<PeakTiming> {
    let angles: Vec<f64> = peaks.iter().map(|peak| day_to_angle(peak.day_of_year)).collect();
    let median = circular_median(&angles)?;
    let days_per_radian = DAYS_PER_CIRCLE / (2.0 * PI);
    let median_day_of_year = (median * days_per_radian).round() as u32 + 1;

    let distances: Vec<f64> = angles
        .iter()
        .map(|angle| circular_distance(*angle, median) * days_per_radian)
        .collect();
    let mut sorted = distances.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let q1 = sorted[(n as f64 * 0.25).floor() as usize];
    let q3 = sorted[((n as f64 * 0.75).floor() as usize).min(n - 1)];
    let threshold_days = q3 + 1.5 * (q3 - q1);

    let points = peaks
        .iter()
        .zip(distances)
        .map(|(peak, distance_days)| PeakTimingPoint {
            year: peak.year,
            day_of_year: peak.day_of_year,
            peak: peak.peak,
            distance_days,
            outlier: distance_days > threshold_days && distance_days > OUTLIER_FLOOR_DAYS,
        })
        .collect();

    Some(PeakTiming {
        median_day_of_year,
        threshold_days,
        points,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyVolume {
    pub year: i32,
    /// Million cubic meters.
    pub volume: f64,
}

/// Annual volume for every year whose twelve monthly averages all exist.
pub fn yearly_volumes(averages: &[MonthlyAverage]) -> Vec<YearlyVolume> {
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for average in averages {
        by_year.entry(average.year).or_default().push(average.value);
    }
    by_year
        .into_iter()
        .filter(|(_, values)| values.len() == 12)
        .map(|(year, values)| YearlyVolume {
            year,
            volume: mean(&values) * SECONDS_PER_YEAR / 1e6,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodVolume {
    /// First year of the period, a multiple of five.
    pub period: i32,
    pub average: f64,
}

pub fn five_year_volumes(volumes: &[YearlyVolume]) -> Vec<PeriodVolume> {
    let mut periods: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for volume in volumes {
        periods
            .entry(volume.year.div_euclid(5) * 5)
            .or_default()
            .push(volume.volume);
    }
    periods
        .into_iter()
        .map(|(period, values)| PeriodVolume {
            period,
            average: mean(&values),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CumulativeYear {
    pub year: i32,
    pub datetime: Vec<DateTime<Utc>>,
    /// Running volume in million cubic meters.
    pub cumulative: Vec<f64>,
}

impl CumulativeYear {
    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CumulativeVolumes {
    pub years: Vec<CumulativeYear>,
    pub driest: Option<i32>,
    pub wettest: Option<i32>,
    pub median: Option<i32>,
}

/// Running yearly volumes with the driest, wettest and median years by
/// year-end total.
pub fn cumulative_volumes(series: &RetrospectiveSeries) -> CumulativeVolumes {
    let mut years: BTreeMap<i32, CumulativeYear> = BTreeMap::new();
    for (date, flow) in series.observations() {
        let year = years.entry(date.year()).or_insert_with(|| CumulativeYear {
            year: date.year(),
            datetime: Vec::new(),
            cumulative: Vec::new(),
        });
        let running = year.total() + flow * SECONDS_PER_DAY / 1e6;
        year.datetime.push(date);
        year.cumulative.push(running);
    }
    let years: Vec<CumulativeYear> = years.into_values().collect();

    let mut ranked: Vec<(i32, f64)> = years.iter().map(|year| (year.year, year.total())).collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    CumulativeVolumes {
        driest: ranked.first().map(|(year, _)| *year),
        wettest: ranked.last().map(|(year, _)| *year),
        median: ranked.get(ranked.len() / 2).map(|(year, _)| *year),
        years,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterHydrograph {
    pub years: Vec<i32>,
    /// One row per year, one column per day of year.
    pub values: Vec<Vec<Option<f64>>>,
}

/// Year by day-of-year grid covering every year from the first to the last
/// timestamp. Days without a value stay empty.
pub fn raster_hydrograph(series: &RetrospectiveSeries) -> RasterHydrograph {
    let (Some(first), Some(last)) = (series.datetime.first(), series.datetime.last()) else {
        return RasterHydrograph {
            years: Vec::new(),
            values: Vec::new(),
        };
    };
    let first_year = first.year();
    let years: Vec<i32> = (first_year..=last.year()).collect();
    let mut values = vec![vec![None; RASTER_DAYS]; years.len()];
    for (date, value) in series.datetime.iter().zip(&series.discharge) {
        let row = (date.year() - first_year) as usize;
        let column = date.ordinal0() as usize;
        if let Some(cell) = values.get_mut(row).and_then(|cells| cells.get_mut(column)) {
            *cell = value.filter(|v| v.is_finite());
        }
    }
    RasterHydrograph { years, values }
}

/// Every retrospective derivation computed from one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetroAnalytics {
    pub monthly_means: Vec<MonthlyMean>,
    pub monthly_average_timeseries: Vec<MonthlyAverage>,
    pub flow_duration_curve: Vec<FdcPoint>,
    pub monthly_flow_duration_curves: Vec<MonthlyFdc>,
    pub status_bands: Vec<StatusBand>,
    pub yearly_peaks: Vec<YearlyPeak>,
    pub peak_timing: Option<PeakTiming>,
    pub yearly_volumes: Vec<YearlyVolume>,
    pub five_year_volumes: Vec<PeriodVolume>,
    pub cumulative_volumes: CumulativeVolumes,
    pub raster_hydrograph: RasterHydrograph,
}

pub fn analyze(series: &RetrospectiveSeries) -> RetroAnalytics {
    analyze_at(series, Utc::now())
}

/// [`analyze`] as of `now`. Peaks of the year still in progress at `now`
/// are left out of the yearly peaks and their seasonal timing.
pub fn analyze_at(series: &RetrospectiveSeries, now: DateTime<Utc>) -> RetroAnalytics {
    let buckets = monthly_buckets(series);
    let averages = monthly_average_timeseries(&buckets);
    let current_year = now.year();
    let peaks: Vec<YearlyPeak> = yearly_peaks(series)
        .into_iter()
        .filter(|peak| peak.year < current_year)
        .collect();
    let volumes = yearly_volumes(&averages);
    RetroAnalytics {
        monthly_means: monthly_means(&averages),
        flow_duration_curve: flow_duration_curve(series),
        monthly_flow_duration_curves: monthly_flow_duration_curves(&buckets),
        status_bands: status_bands(&buckets),
        peak_timing: peak_timing(&peaks),
        yearly_peaks: peaks,
        five_year_volumes: five_year_volumes(&volumes),
        yearly_volumes: volumes,
        cumulative_volumes: cumulative_volumes(series),
        raster_hydrograph: raster_hydrograph(series),
        monthly_average_timeseries: averages,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_run_high_to_low() {
        let curve = sorted_to_percentiles(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(curve.len(), 51);
        assert_eq!(curve[0].percentile, 100);
        assert_eq!(curve[0].discharge, 4.0);
        assert_eq!(curve[50].percentile, 0);
        assert_eq!(curve[50].discharge, 1.0);
        // floor(4 * 50 / 100) = 2
        assert_eq!(curve[25].discharge, 3.0);
    }

    #[test]
    fn circular_distance_wraps() {
        let near_end = day_to_angle(365);
        let start = day_to_angle(1);
        let days = circular_distance(near_end, start) * DAYS_PER_CIRCLE / (2.0 * PI);
        assert!((days - 1.0).abs() < 1e-9);
    }

    #[test]
    fn circular_median_prefers_first_minimum() {
        let angles = [1.0, 2.0];
        assert_eq!(circular_median(&angles), Some(1.0));
        assert_eq!(circular_median(&[]), None);
    }

    #[test]
    fn five_year_periods_floor_years() {
        let volumes = vec![
            YearlyVolume { year: 2001, volume: 10.0 },
            YearlyVolume { year: 2004, volume: 20.0 },
            YearlyVolume { year: 2005, volume: 40.0 },
        ];
        let periods = five_year_volumes(&volumes);
        assert_eq!(
            periods,
            vec![
                PeriodVolume { period: 2000, average: 15.0 },
                PeriodVolume { period: 2005, average: 40.0 },
            ]
        );
    }
}
