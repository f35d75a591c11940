use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::analytics::RetryPolicy;
use crate::error::KiraError;
use crate::projector::SignificanceGate;

pub const DEFAULT_CONFIG_FILE: &str = "kira-od.json";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api/omics";
pub const API_URL_ENV: &str = "KIRA_OD_API_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default)]
    pub gate: Option<GateEntry>,
    #[serde(default)]
    pub export_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GateEntry {
    #[serde(default)]
    pub max_p_value: Option<f64>,
    #[serde(default)]
    pub min_abs_log_fc: Option<f64>,
    #[serde(default)]
    pub cascade_cap: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub gate: SignificanceGate,
    pub export_dir: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            gate: SignificanceGate::default(),
            export_dir: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `kira-od.json` from the working directory when present. An
    /// explicit path must exist.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        let mut resolved = Self::resolve_config(config)?;
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                resolved.api_base_url = validate_base_url(url.trim())?;
            }
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let defaults = ResolvedConfig::default();

        let api_base_url = match config.api_base_url {
            Some(url) => validate_base_url(url.trim())?,
            None => defaults.api_base_url,
        };

        let timeout = match config.timeout_secs {
            Some(0) => {
                return Err(KiraError::ConfigInvalid(
                    "timeout_secs must be positive".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        let retry = RetryPolicy {
            max_retries: config.max_retries.unwrap_or(defaults.retry.max_retries),
            base_delay: config
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
        };

        let gate = match config.gate {
            Some(entry) => resolve_gate(entry, defaults.gate)?,
            None => defaults.gate,
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            api_base_url,
            timeout,
            retry,
            gate,
            export_dir: config.export_dir.map(Utf8PathBuf::from),
        })
    }
}

fn resolve_gate(
    entry: GateEntry,
    defaults: SignificanceGate,
) -> Result<SignificanceGate, KiraError> {
    let gate = SignificanceGate {
        max_p_value: entry.max_p_value.unwrap_or(defaults.max_p_value),
        min_abs_log_fc: entry.min_abs_log_fc.unwrap_or(defaults.min_abs_log_fc),
        cascade_cap: entry.cascade_cap.unwrap_or(defaults.cascade_cap),
    };
    if !(gate.max_p_value > 0.0 && gate.max_p_value <= 1.0) {
        return Err(KiraError::ConfigInvalid(format!(
            "gate.max_p_value {} outside (0, 1]",
            gate.max_p_value
        )));
    }
    if !gate.min_abs_log_fc.is_finite() || gate.min_abs_log_fc < 0.0 {
        return Err(KiraError::ConfigInvalid(format!(
            "gate.min_abs_log_fc {} must be a non-negative number",
            gate.min_abs_log_fc
        )));
    }
    if gate.cascade_cap == 0 {
        return Err(KiraError::ConfigInvalid(
            "gate.cascade_cap must be at least 1".to_string(),
        ));
    }
    Ok(gate)
}

fn validate_base_url(url: &str) -> Result<String, KiraError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(KiraError::ConfigInvalid(format!(
            "api_base_url must be an http(s) URL: {url}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(resolved.timeout, Duration::from_secs(60));
        assert_eq!(resolved.gate, SignificanceGate::default());
        assert!(resolved.export_dir.is_none());
    }
}
