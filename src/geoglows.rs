use reqwest::blocking::{Client, Response};
use serde_json::Value;
use tracing::info;

use crate::domain::{ForecastDate, RiverId};
use crate::error::HydroError;
use crate::http::{HttpSettings, build_client, send_with_retries};

/// REST service delivering bias-corrected series as flat JSON.
pub trait BiasCorrectedSource: Send + Sync {
    fn forecast_ensemble(&self, river_id: RiverId, date: &ForecastDate)
    -> Result<Value, HydroError>;
    fn retrospective_daily(&self, river_id: RiverId) -> Result<Value, HydroError>;
}

#[derive(Clone)]
pub struct GeoglowsHttpClient {
    client: Client,
    settings: HttpSettings,
    endpoint: String,
}

impl GeoglowsHttpClient {
    pub fn new(endpoint: impl Into<String>, settings: HttpSettings) -> Result<Self, HydroError> {
        let client = build_client(&settings).map_err(HydroError::GeoglowsHttp)?;
        Ok(Self {
            client,
            settings,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn forecast_url(&self, river_id: RiverId, date: &ForecastDate) -> String {
        format!(
            "{}/forecastensemble/{river_id}?format=json&date={date}&bias_corrected=true",
            self.endpoint
        )
    }

    pub fn retrospective_url(&self, river_id: RiverId) -> String {
        format!(
            "{}/retrospectivedaily/{river_id}?format=json&bias_corrected=true",
            self.endpoint
        )
    }

    fn handle_status(response: Response) -> Result<Response, HydroError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let message = status
            .canonical_reason()
            .map(str::to_string)
            .or_else(|| response.text().ok())
            .unwrap_or_else(|| "bias-corrected request failed".to_string());
        Err(HydroError::GeoglowsStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, HydroError> {
        info!(url, "requesting bias-corrected data");
        let response = send_with_retries(&self.settings, || self.client.get(url))
            .map_err(|err| HydroError::GeoglowsHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| HydroError::MalformedResponse(err.to_string()))
    }
}

impl BiasCorrectedSource for GeoglowsHttpClient {
    fn forecast_ensemble(
        &self,
        river_id: RiverId,
        date: &ForecastDate,
    ) -> Result<Value, HydroError> {
        self.get_json(&self.forecast_url(river_id, date))
    }

    fn retrospective_daily(&self, river_id: RiverId) -> Result<Value, HydroError> {
        self.get_json(&self.retrospective_url(river_id))
    }
}
