use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use hydroviewer::app::{App, DatasetUrls};
use hydroviewer::cache_key::cache_key;
use hydroviewer::domain::{DatasetRequest, ForecastDate, RetroResolution, RiverId};
use hydroviewer::error::HydroError;
use hydroviewer::geoglows::BiasCorrectedSource;
use hydroviewer::reconcile::member_key;
use hydroviewer::report::RiverFetcher;
use hydroviewer::series::ENSEMBLE_MEMBERS;
use hydroviewer::store::{CacheStore, Collection};
use hydroviewer::zarr::{ChunkedArraySource, Selection};

const RIVERS: [u64; 3] = [11, 22, 33];
const FORECAST_STEPS: usize = 5;
const RETRO_DAYS: usize = 4;

struct MockArray {
    shape: Vec<usize>,
    data: Vec<f64>,
    attrs: Map<String, Value>,
}

/// Single-chunk arrays served from memory, counting reads per array URL.
#[derive(Default)]
struct MockZarr {
    arrays: HashMap<String, MockArray>,
    reads: Mutex<Vec<String>>,
}

impl MockZarr {
    fn insert(&mut self, url: String, shape: Vec<usize>, data: Vec<f64>) {
        self.arrays.insert(
            url,
            MockArray {
                shape,
                data,
                attrs: Map::new(),
            },
        );
    }

    fn insert_time(&mut self, url: String, units: &str, offsets: Vec<f64>) {
        let mut attrs = Map::new();
        attrs.insert("units".to_string(), json!(units));
        self.arrays.insert(
            url,
            MockArray {
                shape: vec![offsets.len()],
                data: offsets,
                attrs,
            },
        );
    }

    fn reads_ending_with(&self, suffix: &str) -> usize {
        self.reads
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(suffix))
            .count()
    }
}

impl ChunkedArraySource for MockZarr {
    fn attributes(&self, array_url: &str) -> Result<Map<String, Value>, HydroError> {
        Ok(self
            .arrays
            .get(array_url)
            .map(|array| array.attrs.clone())
            .unwrap_or_default())
    }

    fn read(&self, array_url: &str, selection: &[Selection]) -> Result<Vec<f64>, HydroError> {
        self.reads.lock().unwrap().push(array_url.to_string());
        let array = self
            .arrays
            .get(array_url)
            .ok_or_else(|| HydroError::MalformedArray(format!("no array at {array_url}")))?;
        if selection.len() != array.shape.len() {
            return Err(HydroError::MalformedArray("rank mismatch".to_string()));
        }
        let axes: Vec<(usize, usize)> = selection
            .iter()
            .zip(&array.shape)
            .map(|(sel, len)| {
                sel.bounds(*len as u64)
                    .map(|(start, count)| (start as usize, count as usize))
            })
            .collect::<Result<_, _>>()?;

        // row-major walk over the selected block
        let mut flat = vec![0usize];
        for ((start, count), len) in axes.iter().zip(&array.shape) {
            flat = flat
                .iter()
                .flat_map(|base| (*start..start + count).map(move |idx| base * len + idx))
                .collect();
        }
        Ok(flat.into_iter().map(|offset| array.data[offset]).collect())
    }
}

#[derive(Default)]
struct MockRest {
    forecast_calls: Mutex<usize>,
    retro_calls: Mutex<usize>,
}

impl BiasCorrectedSource for MockRest {
    fn forecast_ensemble(
        &self,
        _river_id: RiverId,
        _date: &ForecastDate,
    ) -> Result<Value, HydroError> {
        *self.forecast_calls.lock().unwrap() += 1;
        let mut object = Map::new();
        object.insert(
            "datetime".to_string(),
            json!(["2024-01-01T00:00:00Z", "2024-01-01T03:00:00Z", "2024-01-01T06:00:00Z"]),
        );
        for member in 1..=ENSEMBLE_MEMBERS {
            let value = member as f64;
            let corrected = if member == 1 {
                json!([value, "", value])
            } else {
                json!([value, value, value])
            };
            object.insert(member_key(member), corrected);
            object.insert(
                format!("{}_original", member_key(member)),
                json!([value * 2.0, value * 2.0, value * 2.0]),
            );
        }
        Ok(Value::Object(object))
    }

    fn retrospective_daily(&self, river_id: RiverId) -> Result<Value, HydroError> {
        *self.retro_calls.lock().unwrap() += 1;
        let mut object = Map::new();
        object.insert("datetime".to_string(), json!(["2000-01-01", "2000-01-02"]));
        object.insert(river_id.to_string(), json!([1.0, null]));
        object.insert(format!("{river_id}_original"), json!([2.0, 3.0]));
        Ok(Value::Object(object))
    }
}

fn urls() -> DatasetUrls {
    DatasetUrls {
        retrospective_base: "https://retro.test".to_string(),
        forecast_base: "https://forecast.test".to_string(),
    }
}

fn forecast_date() -> ForecastDate {
    "20240101".parse().unwrap()
}

fn mock_zarr() -> MockZarr {
    let urls = urls();
    let mut zarr = MockZarr::default();
    let rivers = RIVERS.len();

    let retro = urls.retrospective(RetroResolution::Daily);
    zarr.insert(
        format!("{retro}/river_id"),
        vec![rivers],
        RIVERS.iter().map(|id| *id as f64).collect(),
    );
    zarr.insert_time(
        format!("{retro}/time"),
        "days since 2000-01-01",
        (0..RETRO_DAYS).map(|day| day as f64).collect(),
    );
    let mut q = Vec::new();
    for day in 0..RETRO_DAYS {
        for river in 0..rivers {
            q.push(if day == 2 && river == 1 {
                f64::NAN
            } else {
                (day + river * 100) as f64
            });
        }
    }
    zarr.insert(format!("{retro}/Q"), vec![RETRO_DAYS, rivers], q);

    let forecast = urls.forecast(&forecast_date());
    zarr.insert_time(
        format!("{forecast}/time"),
        "hours since 2024-01-01 00:00:00",
        (0..FORECAST_STEPS).map(|step| (step * 3) as f64).collect(),
    );
    let mut qout = Vec::new();
    for member in 0..ENSEMBLE_MEMBERS {
        for step in 0..FORECAST_STEPS {
            for river in 0..rivers {
                qout.push(if member == 0 && step == 4 && river == 1 {
                    f64::NAN
                } else {
                    ((member + 1) * 10 + step + river * 1000) as f64
                });
            }
        }
    }
    zarr.insert(
        format!("{forecast}/Qout"),
        vec![ENSEMBLE_MEMBERS, FORECAST_STEPS, rivers],
        qout,
    );

    let periods = urls.return_periods();
    zarr.insert(
        format!("{periods}/return_period"),
        vec![6],
        vec![2.0, 5.0, 10.0, 25.0, 50.0, 100.0],
    );
    let mut gumbel = Vec::new();
    for label in 0..6 {
        for river in 0..rivers {
            gumbel.push(((label + 1) * 100 + river) as f64);
        }
    }
    zarr.insert(format!("{periods}/gumbel"), vec![6, rivers], gumbel);
    zarr
}

fn build_app(temp: &tempfile::TempDir) -> App<MockZarr, MockRest> {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    let store = CacheStore::new_with_root(root, 300);
    store.open().unwrap();
    App::new(store, mock_zarr(), MockRest::default(), urls())
}

#[test]
fn forecast_is_served_from_cache_on_second_call() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(22);

    let first = app.get_forecast(river, &forecast_date(), false).unwrap();
    assert_eq!(first.member_count(), ENSEMBLE_MEMBERS);
    // the last step is empty in the first member and dropped
    assert_eq!(first.len(), FORECAST_STEPS - 1);
    assert_eq!(first.discharge[0], vec![1010.0, 1011.0, 1012.0, 1013.0]);
    assert_eq!(first.stats.len(), FORECAST_STEPS - 1);
    assert_eq!(first.stats.min[0], 1010.0);
    assert_eq!(first.stats.max[0], 1510.0);
    assert!(!first.is_bias_corrected());

    let second = app.get_forecast(river, &forecast_date(), false).unwrap();
    assert_eq!(first, second);
    assert_eq!(app.zarr_reads("/Qout"), 1);
}

#[test]
fn unknown_river_fails_before_any_data_fetch() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(999);

    let err = app.get_forecast(river, &forecast_date(), false).unwrap_err();
    assert_matches!(err, HydroError::RiverNotFound(999));
    let err = app.get_forecast(river, &forecast_date(), true).unwrap_err();
    assert_matches!(err, HydroError::RiverNotFound(999));
    let err = app.get_retrospective(river, true).unwrap_err();
    assert_matches!(err, HydroError::RiverNotFound(999));

    assert_eq!(app.zarr_reads("/Qout"), 0);
    assert_eq!(*app.rest_calls().forecast_calls.lock().unwrap(), 0);
    assert_eq!(*app.rest_calls().retro_calls.lock().unwrap(), 0);
}

#[test]
fn river_ids_are_cached() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);

    assert_eq!(app.river_ids().unwrap(), RIVERS.to_vec());
    assert!(app.validate_river(RiverId::new(33)).unwrap().exists);
    assert!(!app.validate_river(RiverId::new(34)).unwrap().exists);
    assert_eq!(app.zarr_reads("/river_id"), 1);
}

#[test]
fn corrected_forecast_uses_bias_corrected_source() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(11);

    let corrected = app.get_forecast(river, &forecast_date(), true).unwrap();
    assert!(corrected.is_bias_corrected());
    assert_eq!(corrected.len(), 2);
    assert_eq!(corrected.discharge[4], vec![5.0, 5.0]);
    assert_eq!(corrected.discharge_original.as_ref().unwrap()[4], vec![10.0, 10.0]);
    assert_eq!(corrected.stats_original.as_ref().unwrap().median[0], 52.0);

    app.get_forecast(river, &forecast_date(), true).unwrap();
    assert_eq!(*app.rest_calls().forecast_calls.lock().unwrap(), 1);
    assert_eq!(app.zarr_reads("/Qout"), 0);

    let plain = app.get_forecast(river, &forecast_date(), false).unwrap();
    assert!(!plain.is_bias_corrected());
    assert_eq!(app.zarr_reads("/Qout"), 1);
}

#[test]
fn retrospective_keeps_missing_values() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(22);

    let series = app.get_retrospective(river, false).unwrap();
    assert_eq!(series.len(), RETRO_DAYS);
    assert_eq!(
        series.discharge,
        vec![Some(100.0), Some(101.0), None, Some(103.0)]
    );
    assert_eq!(series.datetime[1].to_rfc3339(), "2000-01-02T00:00:00+00:00");

    app.get_retrospective(river, false).unwrap();
    assert_eq!(app.zarr_reads("/Q"), 1);

    let corrected = app.get_retrospective(river, true).unwrap();
    assert_eq!(corrected.discharge, vec![Some(1.0), None]);
    assert_eq!(corrected.discharge_original, Some(vec![Some(2.0), Some(3.0)]));
}

#[test]
fn return_periods_come_from_the_chunked_source() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(33);

    let table = app.get_return_periods(river, false).unwrap();
    assert_eq!(table.len(), 6);
    assert_eq!(table.get(2), Some(102.0));
    assert_eq!(table.get(100), Some(602.0));
    assert!(table.is_monotonic());

    let corrected = app.get_return_periods(river, true).unwrap();
    assert_eq!(corrected, table);
    assert_eq!(app.zarr_reads("/gumbel"), 2);
    assert_eq!(*app.rest_calls().forecast_calls.lock().unwrap(), 0);
}

#[test]
fn corrupt_cache_entry_is_refetched() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(11);

    let key = cache_key(&DatasetRequest::return_periods(river, false));
    let path = app.store().entry_path(Collection::Discharge, key.as_str());
    std::fs::write(path.as_std_path(), b"{truncated").unwrap();

    let table = app.get_return_periods(river, false).unwrap();
    assert_eq!(table.get(5), Some(200.0));
    assert_eq!(app.zarr_reads("/gumbel"), 1);
}

#[test]
fn clear_cache_forgets_everything() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);
    let river = RiverId::new(22);

    app.get_return_periods(river, false).unwrap();
    assert!(app.clear_cache().unwrap().cleared);
    assert!(app.store().is_empty(Collection::Discharge).unwrap());
    assert!(app.store().is_empty(Collection::Rivers).unwrap());

    app.get_return_periods(river, false).unwrap();
    assert_eq!(app.zarr_reads("/river_id"), 2);
    assert_eq!(app.zarr_reads("/gumbel"), 2);
}

#[test]
fn report_data_combines_forecast_and_return_periods() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);

    let data = app
        .fetch_report_data(RiverId::new(22), &forecast_date())
        .unwrap();
    assert_eq!(data.river_id, RiverId::new(22));
    assert_eq!(data.forecast.len(), FORECAST_STEPS - 1);
    assert_eq!(data.return_periods.get(10), Some(301.0));
}

#[test]
fn uncached_retrospective_needs_a_known_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let app = build_app(&temp);

    let err = app
        .fetch_retrospective(RiverId::new(22), RetroResolution::Monthly)
        .unwrap_err();
    assert_matches!(err, HydroError::MalformedArray(_));
}

trait AppProbe {
    fn zarr_reads(&self, suffix: &str) -> usize;
    fn rest_calls(&self) -> &MockRest;
}

impl AppProbe for App<MockZarr, MockRest> {
    fn zarr_reads(&self, suffix: &str) -> usize {
        self.zarr().reads_ending_with(suffix)
    }

    fn rest_calls(&self) -> &MockRest {
        self.rest()
    }
}
