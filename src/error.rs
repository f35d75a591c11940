use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid comparison group: {0:?}")]
    InvalidGroup(String),

    #[error("invalid sort column: {0}")]
    InvalidSortKey(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigInvalid(String),

    #[error("analytics request failed: {0}")]
    ApiHttp(String),

    #[error("analytics service returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("invalid {endpoint} payload: {message}")]
    InvalidPayload { endpoint: String, message: String },

    #[error("row {row} does not match the first row's columns: {detail}")]
    SchemaMismatch { row: usize, detail: String },

    #[error("export failed: {0}")]
    Export(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no analysis has been run yet; nothing to export")]
    NothingToExport,

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl KiraError {
    pub(crate) fn payload(endpoint: &str, message: impl Into<String>) -> Self {
        KiraError::InvalidPayload {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Transport and HTTP-level failures from the analytics service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            KiraError::ApiHttp(_) | KiraError::ApiStatus { .. } | KiraError::InvalidPayload { .. }
        )
    }
}
