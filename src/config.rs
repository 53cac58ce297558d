use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{DEFAULT_FORECAST_BASE_URL, DEFAULT_RETROSPECTIVE_BASE_URL, DatasetUrls};
use crate::domain::RiverId;
use crate::error::HydroError;
use crate::http::HttpSettings;
use crate::report::{DEFAULT_POOL_SIZE, FailurePolicy};
use crate::store::CACHE_CAPACITY;

pub const DEFAULT_CONFIG_FILE: &str = "hydroviewer.json";
pub const DEFAULT_REST_ENDPOINT: &str = "https://geoglows.ecmwf.int/api/v2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub retrospective_base_url: Option<String>,
    #[serde(default)]
    pub forecast_base_url: Option<String>,
    #[serde(default)]
    pub rest_endpoint: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default)]
    pub rivers: Vec<RiverEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RiverEntry {
    Shorthand(u64),
    Detailed(RiverEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RiverEntryObject {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiverBookmark {
    pub id: RiverId,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub urls: DatasetUrls,
    pub rest_endpoint: String,
    pub cache_dir: Option<String>,
    pub cache_capacity: usize,
    pub pool_size: usize,
    pub http: HttpSettings,
    pub failure_policy: FailurePolicy,
    pub rivers: Vec<RiverBookmark>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HydroError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HydroError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HydroError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HydroError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but an absent default file yields the
    /// built-in defaults. An explicit path must still exist.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, HydroError> {
        match Self::resolve(path) {
            Err(HydroError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HydroError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let pool_size = config.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(HydroError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }
        let cache_capacity = config.cache_capacity.unwrap_or(CACHE_CAPACITY);
        if cache_capacity == 0 {
            return Err(HydroError::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(HydroError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        let rivers = config
            .rivers
            .into_iter()
            .map(|entry| match entry {
                RiverEntry::Shorthand(id) => RiverBookmark {
                    id: RiverId::new(id),
                    name: None,
                },
                RiverEntry::Detailed(obj) => RiverBookmark {
                    id: RiverId::new(obj.id),
                    name: obj.name,
                },
            })
            .collect();

        Ok(ResolvedConfig {
            schema_version,
            urls: DatasetUrls {
                retrospective_base: config
                    .retrospective_base_url
                    .unwrap_or_else(|| DEFAULT_RETROSPECTIVE_BASE_URL.to_string()),
                forecast_base: config
                    .forecast_base_url
                    .unwrap_or_else(|| DEFAULT_FORECAST_BASE_URL.to_string()),
            },
            rest_endpoint: config
                .rest_endpoint
                .unwrap_or_else(|| DEFAULT_REST_ENDPOINT.to_string()),
            cache_dir: config.cache_dir,
            cache_capacity,
            pool_size,
            http: HttpSettings {
                timeout: Duration::from_secs(timeout_secs),
                max_retries: config.max_retries.unwrap_or(0),
            },
            failure_policy: config.failure_policy.unwrap_or_default(),
            rivers,
        })
    }
}
