use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::cache_key::{CacheKey, cache_key};
use crate::domain::{DatasetRequest, ForecastDate, RetroResolution, RiverId};
use crate::ensemble::members_to_stats;
use crate::error::HydroError;
use crate::geoglows::BiasCorrectedSource;
use crate::reconcile::{reconcile_forecast, reconcile_retrospective};
use crate::series::{
    ENSEMBLE_MEMBERS, EnsembleSeries, RetrospectiveSeries, ReturnPeriodTable,
};
use crate::store::{CacheStore, Collection};
use crate::zarr::{ChunkedArraySource, Selection, read_coordinate, read_time_coordinate};

/// Key of the identifier list inside the rivers collection.
pub const RIVER_IDS_KEY: &str = "riverIds";

pub const DEFAULT_RETROSPECTIVE_BASE_URL: &str = "https://d2grb3c773p1iz.cloudfront.net";
pub const DEFAULT_FORECAST_BASE_URL: &str = "https://d14ritg1bypdp7.cloudfront.net";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Base URLs of the chunked-array datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetUrls {
    pub retrospective_base: String,
    pub forecast_base: String,
}

impl Default for DatasetUrls {
    fn default() -> Self {
        Self {
            retrospective_base: DEFAULT_RETROSPECTIVE_BASE_URL.to_string(),
            forecast_base: DEFAULT_FORECAST_BASE_URL.to_string(),
        }
    }
}

impl DatasetUrls {
    pub fn forecast(&self, date: &ForecastDate) -> String {
        format!("{}/{date}00.zarr", self.forecast_base.trim_end_matches('/'))
    }

    pub fn retrospective(&self, resolution: RetroResolution) -> String {
        format!(
            "{}/retrospective/{resolution}.zarr",
            self.retrospective_base.trim_end_matches('/')
        )
    }

    pub fn return_periods(&self) -> String {
        format!(
            "{}/retrospective/return-periods.zarr",
            self.retrospective_base.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub river_id: RiverId,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

/// Read-through access to every dataset kind. Each `get_*` call reads the
/// cache first and only reaches a remote source on a miss.
#[derive(Clone)]
pub struct App<Z: ChunkedArraySource, B: BiasCorrectedSource> {
    store: CacheStore,
    zarr: Z,
    rest: B,
    urls: DatasetUrls,
}

impl<Z: ChunkedArraySource, B: BiasCorrectedSource> App<Z, B> {
    pub fn new(store: CacheStore, zarr: Z, rest: B, urls: DatasetUrls) -> Self {
        Self {
            store,
            zarr,
            rest,
            urls,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn urls(&self) -> &DatasetUrls {
        &self.urls
    }

    pub fn zarr(&self) -> &Z {
        &self.zarr
    }

    pub fn rest(&self) -> &B {
        &self.rest
    }

    /// Known river identifiers, fetched once and then served from the
    /// rivers collection until the cache is cleared.
    pub fn river_ids(&self) -> Result<Vec<u64>, HydroError> {
        if let Some(ids) = self.read_cached::<Vec<u64>>(Collection::Rivers, RIVER_IDS_KEY) {
            return Ok(ids);
        }
        let url = self.urls.retrospective(RetroResolution::Daily);
        info!(dataset = %url, "fetching river identifiers");
        let ids: Vec<u64> = read_coordinate(&self.zarr, &url, "river_id")?
            .into_iter()
            .filter(|id| id.is_finite() && *id >= 0.0)
            .map(|id| id as u64)
            .collect();
        self.write_cached(Collection::Rivers, RIVER_IDS_KEY, &ids);
        Ok(ids)
    }

    /// Position of the river along the datasets' river axis.
    pub fn river_index(&self, river_id: RiverId) -> Result<usize, HydroError> {
        self.river_ids()?
            .iter()
            .position(|id| *id == river_id.get())
            .ok_or(HydroError::RiverNotFound(river_id.get()))
    }

    pub fn validate_river(&self, river_id: RiverId) -> Result<ValidateResult, HydroError> {
        let exists = self.river_ids()?.contains(&river_id.get());
        Ok(ValidateResult { river_id, exists })
    }

    pub fn get_forecast(
        &self,
        river_id: RiverId,
        date: &ForecastDate,
        corrected: bool,
    ) -> Result<EnsembleSeries, HydroError> {
        let request = DatasetRequest::forecast(river_id, date.clone(), corrected);
        self.read_through(&request, || {
            if corrected {
                self.river_index(river_id)?;
                let payload = self.rest.forecast_ensemble(river_id, date)?;
                reconcile_forecast(&payload)
            } else {
                self.fetch_forecast(river_id, date)
            }
        })
    }

    /// Latest daily retrospective simulation.
    pub fn get_retrospective(
        &self,
        river_id: RiverId,
        corrected: bool,
    ) -> Result<RetrospectiveSeries, HydroError> {
        let request = DatasetRequest::retrospective(river_id, corrected);
        self.read_through(&request, || {
            if corrected {
                self.river_index(river_id)?;
                let payload = self.rest.retrospective_daily(river_id)?;
                reconcile_retrospective(&payload, river_id)
            } else {
                self.fetch_retrospective(river_id, RetroResolution::Daily)
            }
        })
    }

    /// Return periods come from the uncorrected dataset either way; the
    /// flag only separates the cache entries.
    pub fn get_return_periods(
        &self,
        river_id: RiverId,
        corrected: bool,
    ) -> Result<ReturnPeriodTable, HydroError> {
        let request = DatasetRequest::return_periods(river_id, corrected);
        self.read_through(&request, || self.fetch_return_periods(river_id))
    }

    pub fn clear_cache(&self) -> Result<ClearResult, HydroError> {
        self.store.clear()?;
        info!(root = %self.store.root(), "cache cleared");
        Ok(ClearResult { cleared: true })
    }

    /// Uncached retrospective read at any resolution.
    pub fn fetch_retrospective(
        &self,
        river_id: RiverId,
        resolution: RetroResolution,
    ) -> Result<RetrospectiveSeries, HydroError> {
        let idx = self.river_index(river_id)?;
        let url = self.urls.retrospective(resolution);
        info!(river = %river_id, dataset = %url, "fetching retrospective simulation");
        let datetime = read_time_coordinate(&self.zarr, &url)?;
        let discharge = self
            .zarr
            .read(&format!("{url}/Q"), &[Selection::All, Selection::Index(idx)])?;
        if discharge.len() != datetime.len() {
            return Err(HydroError::MalformedArray(format!(
                "{} discharge values for {} timestamps",
                discharge.len(),
                datetime.len()
            )));
        }
        let discharge = discharge
            .into_iter()
            .map(|value| value.is_finite().then_some(value))
            .collect();
        Ok(RetrospectiveSeries::new(datetime, discharge))
    }

    fn fetch_forecast(
        &self,
        river_id: RiverId,
        date: &ForecastDate,
    ) -> Result<EnsembleSeries, HydroError> {
        let idx = self.river_index(river_id)?;
        let url = self.urls.forecast(date);
        info!(river = %river_id, dataset = %url, "fetching forecast ensemble");
        let datetime = read_time_coordinate(&self.zarr, &url)?;
        let flat = self.zarr.read(
            &format!("{url}/Qout"),
            &[
                Selection::Range(0..ENSEMBLE_MEMBERS),
                Selection::All,
                Selection::Index(idx),
            ],
        )?;
        let steps = datetime.len();
        if steps == 0 || flat.len() % steps != 0 {
            return Err(HydroError::MalformedArray(format!(
                "{} forecast values do not divide into {steps} timesteps",
                flat.len()
            )));
        }

        // the first member decides which timesteps carry data
        let valid: Vec<usize> = flat[..steps]
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_nan())
            .map(|(idx, _)| idx)
            .collect();
        let discharge: Vec<Vec<f64>> = flat
            .chunks_exact(steps)
            .map(|member| valid.iter().map(|idx| member[*idx]).collect())
            .collect();
        let datetime = valid.iter().map(|idx| datetime[*idx]).collect();
        let stats = members_to_stats(&discharge)?;
        Ok(EnsembleSeries {
            datetime,
            discharge,
            discharge_original: None,
            stats,
            stats_original: None,
        })
    }

    fn fetch_return_periods(&self, river_id: RiverId) -> Result<ReturnPeriodTable, HydroError> {
        let idx = self.river_index(river_id)?;
        let url = self.urls.return_periods();
        info!(river = %river_id, dataset = %url, "fetching return periods");
        let labels = read_coordinate(&self.zarr, &url, "return_period")?;
        let magnitudes = self
            .zarr
            .read(&format!("{url}/gumbel"), &[Selection::All, Selection::Index(idx)])?;
        if labels.len() != magnitudes.len() {
            return Err(HydroError::MalformedArray(format!(
                "{} return-period labels for {} magnitudes",
                labels.len(),
                magnitudes.len()
            )));
        }
        Ok(labels
            .into_iter()
            .zip(magnitudes)
            .map(|(label, magnitude)| (label.round() as u32, magnitude))
            .collect())
    }

    fn read_through<T, F>(&self, request: &DatasetRequest, fetch: F) -> Result<T, HydroError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, HydroError>,
    {
        let key = cache_key(request);
        if let Some(cached) = self.read_cached::<T>(Collection::Discharge, key.as_str()) {
            debug!(key = %key, "cache hit");
            return Ok(cached);
        }
        debug!(key = %key, "cache miss");
        let data = fetch()?;
        self.write_discharge(&key, &data);
        Ok(data)
    }

    /// A failed cache read is treated as a miss so fresh data can still be
    /// served.
    fn read_cached<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Option<T> {
        match self.store.read::<T>(collection, key) {
            Ok(value) => value,
            Err(err) => {
                warn!(collection = collection.name(), key, %err, "cache read failed");
                None
            }
        }
    }

    fn write_discharge<T: Serialize>(&self, key: &CacheKey, data: &T) {
        self.write_cached(Collection::Discharge, key.as_str(), data);
    }

    fn write_cached<T: Serialize>(&self, collection: Collection, key: &str, data: &T) {
        if let Err(err) = self.store.write(collection, key, data) {
            warn!(collection = collection.name(), key, %err, "cache write failed");
        }
    }
}
