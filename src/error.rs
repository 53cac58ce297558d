use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HydroError {
    #[error("invalid river id: {0}")]
    InvalidRiverId(String),

    #[error("date '{0}' is not in the correct format YYYYMMDD")]
    InvalidDate(String),

    #[error("resolution '{0}' is not recognized")]
    InvalidResolution(String),

    #[error("river id {0} not found")]
    RiverNotFound(u64),

    #[error("chunked array request failed: {0}")]
    ZarrHttp(String),

    #[error("malformed array payload: {0}")]
    MalformedArray(String),

    #[error("bias-corrected request failed: {0}")]
    GeoglowsHttp(String),

    #[error("bias-corrected endpoint returned status {status}: {message}")]
    GeoglowsStatus { status: u16, message: String },

    #[error("malformed bias-corrected response: {0}")]
    MalformedResponse(String),

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("missing config file hydroviewer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("report task for river {river_id} failed: {cause}")]
    TaskFailed { river_id: u64, cause: String },

    #[error("report worker {0} is unavailable")]
    WorkerUnavailable(usize),
}

impl HydroError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            HydroError::InvalidRiverId(_)
                | HydroError::InvalidDate(_)
                | HydroError::InvalidResolution(_)
                | HydroError::RiverNotFound(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            HydroError::ZarrHttp(_)
                | HydroError::MalformedArray(_)
                | HydroError::GeoglowsHttp(_)
                | HydroError::GeoglowsStatus { .. }
                | HydroError::MalformedResponse(_)
        )
    }
}
