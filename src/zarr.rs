//! Chunked-array access for the discharge datasets.
//!
//! Arrays are opened with `zarrs` over its HTTP store; chunk decoding,
//! compression and missing-chunk fill values are handled there.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use tracing::debug;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::ReadableStorageTraits;
use zarrs_http::HTTPStore;

use crate::error::HydroError;
use crate::series::parse_timestamp;

/// Per-dimension selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Index(usize),
    Range(std::ops::Range<usize>),
}

impl Selection {
    /// `(start, count)` of this selection along a dimension of length `len`.
    /// Ranges are clipped to the dimension; indices must be in bounds.
    pub fn bounds(&self, len: u64) -> Result<(u64, u64), HydroError> {
        match self {
            Selection::All => Ok((0, len)),
            Selection::Index(idx) if (*idx as u64) < len => Ok((*idx as u64, 1)),
            Selection::Index(idx) => Err(HydroError::MalformedArray(format!(
                "index {idx} out of bounds for dimension of length {len}"
            ))),
            Selection::Range(range) => {
                let start = (range.start as u64).min(len);
                let end = (range.end as u64).min(len).max(start);
                Ok((start, end - start))
            }
        }
    }
}

/// Source of chunked arrays addressed by URL (`{dataset}/{variable}`).
pub trait ChunkedArraySource: Send + Sync {
    /// The array's attributes, empty when it has none.
    fn attributes(&self, array_url: &str) -> Result<Map<String, Value>, HydroError>;
    /// Selected elements in C order, widened to `f64`.
    fn read(&self, array_url: &str, selection: &[Selection]) -> Result<Vec<f64>, HydroError>;
}

/// Opens the array at `path` (`/variable`) inside `storage`.
pub fn open_array<S>(storage: Arc<S>, path: &str) -> Result<Array<S>, HydroError>
where
    S: ReadableStorageTraits + ?Sized + 'static,
{
    Array::open(storage, path)
        .map_err(|err| HydroError::ZarrHttp(format!("open array {path}: {err}")))
}

/// Reads `selection` from `array`. Chunks that were never written read as
/// the array's fill value.
pub fn read_array<S>(array: &Array<S>, selection: &[Selection]) -> Result<Vec<f64>, HydroError>
where
    S: ReadableStorageTraits + ?Sized + 'static,
{
    let shape = array.shape();
    if selection.len() != shape.len() {
        return Err(HydroError::MalformedArray(format!(
            "selection has {} dimensions, array has {}",
            selection.len(),
            shape.len()
        )));
    }
    let (start, counts): (Vec<u64>, Vec<u64>) = selection
        .iter()
        .zip(shape)
        .map(|(sel, len)| sel.bounds(*len))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unzip();
    if counts.contains(&0) {
        return Ok(Vec::new());
    }
    let subset = ArraySubset::new_with_start_shape(start, counts)
        .map_err(|err| HydroError::MalformedArray(err.to_string()))?;

    macro_rules! elements {
        ($ty:ty) => {
            array
                .retrieve_array_subset_elements::<$ty>(&subset)
                .map_err(|err| HydroError::ZarrHttp(err.to_string()))?
                .into_iter()
                .map(|value| value as f64)
                .collect()
        };
    }
    let values: Vec<f64> = match array.data_type() {
        DataType::Float32 => elements!(f32),
        DataType::Float64 => elements!(f64),
        DataType::Int8 => elements!(i8),
        DataType::Int16 => elements!(i16),
        DataType::Int32 => elements!(i32),
        DataType::Int64 => elements!(i64),
        DataType::UInt8 => elements!(u8),
        DataType::UInt16 => elements!(u16),
        DataType::UInt32 => elements!(u32),
        DataType::UInt64 => elements!(u64),
        other => {
            return Err(HydroError::MalformedArray(format!(
                "unsupported data type {other:?}"
            )));
        }
    };
    Ok(values)
}

/// `ChunkedArraySource` over HTTP, one store per dataset root.
#[derive(Default)]
pub struct ZarrHttpClient {
    stores: Mutex<HashMap<String, Arc<HTTPStore>>>,
}

impl ZarrHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, array_url: &str) -> Result<Array<HTTPStore>, HydroError> {
        let (dataset_url, variable) = array_url.rsplit_once('/').ok_or_else(|| {
            HydroError::ZarrHttp(format!("'{array_url}' does not name an array"))
        })?;
        let store = {
            let mut stores = self
                .stores
                .lock()
                .map_err(|_| HydroError::ZarrHttp("store registry poisoned".to_string()))?;
            match stores.get(dataset_url) {
                Some(store) => Arc::clone(store),
                None => {
                    let store = Arc::new(
                        HTTPStore::new(dataset_url)
                            .map_err(|err| HydroError::ZarrHttp(err.to_string()))?,
                    );
                    stores.insert(dataset_url.to_string(), Arc::clone(&store));
                    store
                }
            }
        };
        open_array(store, &format!("/{variable}"))
    }
}

impl ChunkedArraySource for ZarrHttpClient {
    fn attributes(&self, array_url: &str) -> Result<Map<String, Value>, HydroError> {
        Ok(self.open(array_url)?.attributes().clone())
    }

    fn read(&self, array_url: &str, selection: &[Selection]) -> Result<Vec<f64>, HydroError> {
        let array = self.open(array_url)?;
        let values = read_array(&array, selection)?;
        debug!(array = array_url, values = values.len(), "array read");
        Ok(values)
    }
}

/// Decoded `"<unit> since <origin>"` time units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub seconds_per_unit: f64,
    pub origin: DateTime<Utc>,
}

impl TimeUnits {
    pub fn to_datetime(&self, offset: f64) -> Result<DateTime<Utc>, HydroError> {
        let out_of_range =
            || HydroError::MalformedArray(format!("time offset {offset} is out of range"));
        let millis = offset * self.seconds_per_unit * 1000.0;
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return Err(out_of_range());
        }
        TimeDelta::try_milliseconds(millis.round() as i64)
            .and_then(|delta| self.origin.checked_add_signed(delta))
            .ok_or_else(out_of_range)
    }
}

impl FromStr for TimeUnits {
    type Err = HydroError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || HydroError::MalformedArray(format!("unrecognized time units '{value}'"));
        let (unit, origin) = value.split_once("since").ok_or_else(invalid)?;
        let seconds_per_unit = match unit.trim() {
            "seconds" => 1.0,
            "minutes" => 60.0,
            "hours" => 3_600.0,
            "days" => 86_400.0,
            _ => return Err(invalid()),
        };
        let origin = parse_timestamp(origin).ok_or_else(invalid)?;
        Ok(Self {
            seconds_per_unit,
            origin,
        })
    }
}

/// Reads `{dataset}/time` and converts its offsets to timestamps.
pub fn read_time_coordinate<S: ChunkedArraySource + ?Sized>(
    source: &S,
    dataset_url: &str,
) -> Result<Vec<DateTime<Utc>>, HydroError> {
    let array_url = format!("{dataset_url}/time");
    let attrs = source.attributes(&array_url)?;
    let units: TimeUnits = attrs
        .get("units")
        .and_then(Value::as_str)
        .ok_or_else(|| HydroError::MalformedArray(format!("{array_url} has no units")))?
        .parse()?;
    source
        .read(&array_url, &[Selection::All])?
        .into_iter()
        .map(|offset| units.to_datetime(offset))
        .collect()
}

/// Reads a one-dimensional coordinate variable in full.
pub fn read_coordinate<S: ChunkedArraySource + ?Sized>(
    source: &S,
    dataset_url: &str,
    variable: &str,
) -> Result<Vec<f64>, HydroError> {
    source.read(&format!("{dataset_url}/{variable}"), &[Selection::All])
}
