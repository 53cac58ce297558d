use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use hydroviewer::retro::{
    MIN_MONTHLY_SAMPLES, RASTER_DAYS, SECONDS_PER_YEAR, STATUS_LABELS, YearlyPeak, analyze,
    analyze_at,
    cumulative_volumes, flow_duration_curve, monthly_average_timeseries, monthly_buckets,
    monthly_means, peak_timing, raster_hydrograph, status_bands, yearly_peaks, yearly_volumes,
};
use hydroviewer::series::RetrospectiveSeries;

fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// Daily series from `start` (inclusive) to `end` (exclusive).
fn daily<F>(start: DateTime<Utc>, end: DateTime<Utc>, value: F) -> RetrospectiveSeries
where
    F: Fn(DateTime<Utc>) -> Option<f64>,
{
    let mut datetime = Vec::new();
    let mut discharge = Vec::new();
    let mut current = start;
    while current < end {
        datetime.push(current);
        discharge.push(value(current));
        current += Duration::days(1);
    }
    RetrospectiveSeries::new(datetime, discharge)
}

fn peak(year: i32, day_of_year: u32) -> YearlyPeak {
    let date = NaiveDate::from_yo_opt(year, day_of_year)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    YearlyPeak {
        year,
        date,
        day_of_year,
        peak: 100.0,
    }
}

#[test]
fn flow_duration_curve_spans_extremes() {
    let start = day(2000, 1, 1);
    let series = daily(start, start + Duration::days(101), |date| {
        Some((date - start).num_days() as f64)
    });

    let curve = flow_duration_curve(&series);
    assert_eq!(curve.len(), 51);
    assert_eq!(curve[0].percentile, 100);
    assert_eq!(curve[0].discharge, 100.0);
    assert_eq!(curve[50].percentile, 0);
    assert_eq!(curve[50].discharge, 0.0);
    assert!(curve.windows(2).all(|pair| pair[0].discharge >= pair[1].discharge));
}

#[test]
fn flow_duration_curve_skips_missing_values() {
    let series = RetrospectiveSeries::new(
        vec![day(2000, 1, 1), day(2000, 1, 2), day(2000, 1, 3)],
        vec![Some(5.0), None, Some(f64::NAN)],
    );
    let curve = flow_duration_curve(&series);
    assert!(curve.iter().all(|point| point.discharge == 5.0));
}

#[test]
fn sparse_months_are_dropped() {
    let series = daily(day(2020, 1, 1), day(2020, 4, 1), |date| {
        let keep = match date.month() {
            1 => true,
            2 => date.day() <= MIN_MONTHLY_SAMPLES as u32,
            _ => date.day() < MIN_MONTHLY_SAMPLES as u32,
        };
        keep.then_some(1.0)
    });

    let buckets = monthly_buckets(&series);
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[&(2020, 2)].len(), MIN_MONTHLY_SAMPLES);
    assert!(!buckets.contains_key(&(2020, 3)));
}

#[test]
fn monthly_means_average_bucket_means() {
    // only the two Januaries carry data
    let series = daily(day(2020, 1, 1), day(2021, 2, 1), |date| {
        match (date.year(), date.month()) {
            (2020, 1) => Some(1.0),
            (2021, 1) => Some(3.0),
            _ => None,
        }
    });
    let buckets = monthly_buckets(&series);
    let averages = monthly_average_timeseries(&buckets);
    let means = monthly_means(&averages);
    assert_eq!(means.len(), 12);
    assert_eq!(means[0].value, Some(2.0));
    assert!(means[1..].iter().all(|mean| mean.value.is_none()));
}

#[test]
fn lone_early_peak_is_the_only_outlier() {
    let mut peaks: Vec<YearlyPeak> = (0..9)
        .map(|offset| peak(2000 + offset, 175 + offset as u32))
        .collect();
    peaks.push(peak(2009, 1));

    let timing = peak_timing(&peaks).unwrap();
    assert!((175..=183).contains(&timing.median_day_of_year));
    let outliers: Vec<i32> = timing
        .points
        .iter()
        .filter(|point| point.outlier)
        .map(|point| point.year)
        .collect();
    assert_eq!(outliers, vec![2009]);
}

#[test]
fn peaks_wrapping_the_new_year_are_not_outliers() {
    let peaks = vec![
        peak(2000, 360),
        peak(2001, 2),
        peak(2002, 364),
        peak(2003, 5),
        peak(2004, 1),
    ];
    let timing = peak_timing(&peaks).unwrap();
    assert!(timing.points.iter().all(|point| !point.outlier));
    assert!(timing.points.iter().all(|point| point.distance_days < 10.0));
}

#[test]
fn yearly_peak_takes_earliest_maximum() {
    let series = daily(day(2001, 1, 1), day(2002, 1, 1), |date| {
        let ordinal = date.ordinal();
        Some(if ordinal == 40 || ordinal == 200 { 50.0 } else { 1.0 })
    });
    let peaks = yearly_peaks(&series);
    assert_eq!(peaks.len(), 1);
    assert_eq!(peaks[0].day_of_year, 40);
    assert_eq!(peaks[0].peak, 50.0);
}

#[test]
fn complete_years_have_volumes() {
    // 2020 is complete; 2021 stops in June
    let series = daily(day(2020, 1, 1), day(2021, 7, 1), |_| Some(10.0));
    let buckets = monthly_buckets(&series);
    let averages = monthly_average_timeseries(&buckets);
    let volumes = yearly_volumes(&averages);
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].year, 2020);
    let expected = 10.0 * SECONDS_PER_YEAR / 1e6;
    assert!((volumes[0].volume - expected).abs() < 1e-9);
}

#[test]
fn cumulative_volumes_rank_years() {
    let series = daily(day(2010, 1, 1), day(2013, 1, 1), |date| {
        match date.year() {
            2010 => Some(2.0),
            2011 => Some(1.0),
            _ => Some(3.0),
        }
    });
    let volumes = cumulative_volumes(&series);
    assert_eq!(volumes.years.len(), 3);
    assert_eq!(volumes.driest, Some(2011));
    assert_eq!(volumes.wettest, Some(2012));
    assert_eq!(volumes.median, Some(2010));
    let first = &volumes.years[0];
    assert!(first.cumulative.windows(2).all(|pair| pair[0] < pair[1]));
    assert!((first.cumulative[0] - 2.0 * 86_400.0 / 1e6).abs() < 1e-12);
}

#[test]
fn raster_covers_every_year() {
    let series = daily(day(2020, 1, 1), day(2022, 1, 1), |date| {
        (date.ordinal() != 10).then_some(4.0)
    });
    let raster = raster_hydrograph(&series);
    assert_eq!(raster.years, vec![2020, 2021]);
    assert!(raster.values.iter().all(|row| row.len() == RASTER_DAYS));
    assert_eq!(raster.values[0][365], Some(4.0));
    assert_eq!(raster.values[1][365], None);
    assert_eq!(raster.values[1][9], None);
    assert_eq!(raster.values[1][10], Some(4.0));
}

#[test]
fn status_bands_run_wet_to_dry() {
    let start = day(2015, 1, 1);
    let series = daily(start, day(2016, 1, 1), |date| {
        Some((date - start).num_days() as f64)
    });
    let bands = status_bands(&monthly_buckets(&series));
    assert_eq!(bands.len(), STATUS_LABELS.len());
    assert_eq!(bands[0].label, "very wet");
    // January holds 0..=30; percentile 0 of the descending list is the maximum
    assert_eq!(bands[0].values[0], Some(30.0));
    for month in 0..12 {
        let column: Vec<f64> = bands.iter().filter_map(|band| band.values[month]).collect();
        assert_eq!(column.len(), bands.len());
        assert!(column.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}

#[test]
fn analytics_bundle_is_consistent() {
    let series = daily(day(2000, 1, 1), day(2003, 1, 1), |date| {
        Some(1.0 + f64::from(date.ordinal()))
    });
    let analytics = analyze(&series);
    assert_eq!(analytics.yearly_peaks.len(), 3);
    assert_eq!(analytics.yearly_volumes.len(), 3);
    assert_eq!(analytics.five_year_volumes.len(), 1);
    assert_eq!(analytics.monthly_average_timeseries.len(), 36);
    assert_eq!(analytics.raster_hydrograph.years.len(), 3);
    assert!(analytics.peak_timing.is_some());
}

#[test]
fn year_in_progress_is_left_out_of_peak_timing() {
    // peaks every June, then a partial 2004 whose maximum lands in January
    let series = daily(day(2000, 1, 1), day(2004, 2, 1), |date| {
        let in_june = date.month() == 6 && date.day() == 15;
        let partial = date.year() == 2004 && date.day() == 10;
        Some(if in_june || partial { 90.0 } else { 1.0 })
    });

    let analytics = analyze_at(&series, day(2004, 2, 1));
    let years: Vec<i32> = analytics.yearly_peaks.iter().map(|peak| peak.year).collect();
    assert_eq!(years, vec![2000, 2001, 2002, 2003]);
    let timing = analytics.peak_timing.unwrap();
    assert_eq!(timing.points.len(), 4);
    assert!(timing.points.iter().all(|point| !point.outlier));

    let later = analyze_at(&series, day(2005, 1, 1));
    assert_eq!(later.yearly_peaks.len(), 5);
}
