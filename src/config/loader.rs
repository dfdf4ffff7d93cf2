use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Context, Result};

use super::{validator, PipelineConfig};

/// Load the pipeline configuration, overlaying an optional JSON file on the defaults.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        let config = PipelineConfig::default();
        validator::validate_config(&config)?;
        return Ok(config);
    };

    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline config at {}", path.display()))?;

    load_config_from_str(&json).map_err(|err| match err {
        AppError::Configuration(msg) => {
            AppError::configuration(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse and validate a JSON document with camelCase, all-optional fields.
pub fn load_config_from_str(json: &str) -> Result<PipelineConfig> {
    let raw: RawPipelineConfig = serde_json::from_str(json)
        .map_err(|err| AppError::configuration(format!("failed to parse config JSON: {err}")))?;

    let config = raw.into_config();
    validator::validate_config(&config)?;
    Ok(config)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawPipelineConfig {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    page_size: Option<u32>,
    #[serde(default)]
    request_timeout: Option<u64>,
    #[serde(default)]
    min_results_threshold: Option<usize>,
    #[serde(default)]
    cache_time: Option<u64>,
    #[serde(default)]
    dynamic_threshold_percentage: Option<f64>,
    #[serde(default)]
    refresh_interval: Option<u64>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    initial_delay: Option<u64>,
    #[serde(default)]
    max_delay: Option<u64>,
    #[serde(default)]
    multiplier: Option<f64>,
    #[serde(default)]
    search_debounce: Option<u64>,
    #[serde(default)]
    min_query_length: Option<usize>,
}

impl RawPipelineConfig {
    fn into_config(self) -> PipelineConfig {
        let mut config = PipelineConfig::default();

        if let Some(base_url) = self.base_url {
            config.api.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(currency) = self.currency {
            config.api.currency = currency.trim().to_lowercase();
        }
        if let Some(page_size) = self.page_size {
            config.api.page_size = page_size;
        }
        if let Some(ms) = self.request_timeout {
            config.api.timeout = Duration::from_millis(ms);
        }

        if let Some(min) = self.min_results_threshold {
            config.filter.min_results_threshold = min;
        }
        if let Some(ms) = self.cache_time {
            config.filter.cache_time = Duration::from_millis(ms);
        }
        if let Some(pct) = self.dynamic_threshold_percentage {
            config.filter.dynamic_threshold_percentage = pct;
        }

        if let Some(ms) = self.refresh_interval {
            config.refresh_interval = Duration::from_millis(ms);
        }

        if let Some(max) = self.max_retries {
            config.retry.max_retries = max;
        }
        if let Some(ms) = self.initial_delay {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = self.multiplier {
            config.retry.multiplier = multiplier;
        }

        if let Some(ms) = self.search_debounce {
            config.search.debounce = Duration::from_millis(ms);
        }
        if let Some(len) = self.min_query_length {
            config.search.min_query_len = len;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_document_yields_defaults() {
        let config = load_config_from_str("{}").expect("defaults load");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn overlays_recognised_options() {
        let json = r#"{
            "minResultsThreshold": 8,
            "cacheTime": 30000,
            "dynamicThresholdPercentage": 0.25,
            "refreshInterval": 15000,
            "maxRetries": 5,
            "initialDelay": 250,
            "maxDelay": 4000,
            "multiplier": 3,
            "baseUrl": "http://localhost:9000/",
            "currency": " EUR "
        }"#;

        let config = load_config_from_str(json).expect("config loads");
        assert_eq!(config.filter.min_results_threshold, 8);
        assert_eq!(config.filter.cache_time, Duration::from_secs(30));
        assert!((config.filter.dynamic_threshold_percentage - 0.25).abs() < 1e-9);
        assert_eq!(config.refresh_interval, Duration::from_secs(15));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_secs(4));
        assert!((config.retry.multiplier - 3.0).abs() < 1e-9);
        assert_eq!(config.api.base_url, "http://localhost:9000");
        assert_eq!(config.api.currency, "eur");
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = load_config_from_str(r#"{ "refreshIntervall": 1000 }"#)
            .expect_err("typo should be rejected");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Some(Path::new("/definitely/not/here.json")))
            .expect_err("missing file should fail");
        assert!(err.to_string().contains("failed to read pipeline config"));
    }
}
