use crate::error::{AppError, Result};

use super::PipelineConfig;

/// Validate the configuration once and surface every issue together.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_api(config, &mut issues);
    validate_filter(config, &mut issues);
    validate_retry(config, &mut issues);

    if config.refresh_interval.as_millis() < 1_000 {
        issues.push("refreshInterval must be at least 1000ms".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::configuration(format!(
            "pipeline config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_api(config: &PipelineConfig, issues: &mut Vec<String>) {
    let api = &config.api;
    if !(api.base_url.starts_with("https://") || api.base_url.starts_with("http://")) {
        issues.push(format!("baseUrl `{}` must be an http(s) URL", api.base_url));
    }
    if api.currency.is_empty() {
        issues.push("currency must not be empty".to_string());
    }
    if api.page_size == 0 || api.page_size > 250 {
        issues.push(format!("pageSize {} must be within 1..=250", api.page_size));
    }
    if api.timeout.is_zero() {
        issues.push("requestTimeout must be positive".to_string());
    }
}

fn validate_filter(config: &PipelineConfig, issues: &mut Vec<String>) {
    let filter = &config.filter;
    let pct = filter.dynamic_threshold_percentage;
    if !pct.is_finite() || pct <= 0.0 || pct > 1.0 {
        issues.push(format!(
            "dynamicThresholdPercentage {pct} must be within (0, 1]"
        ));
    }
    if filter.cache_time.is_zero() {
        issues.push("cacheTime must be positive".to_string());
    }
}

fn validate_retry(config: &PipelineConfig, issues: &mut Vec<String>) {
    let retry = &config.retry;
    if retry.max_retries == 0 {
        issues.push("maxRetries must allow at least one attempt".to_string());
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        issues.push(format!("multiplier {} must be >= 1", retry.multiplier));
    }
    if retry.initial_delay > retry.max_delay {
        issues.push(format!(
            "initialDelay {}ms exceeds maxDelay {}ms",
            retry.initial_delay.as_millis(),
            retry.max_delay.as_millis()
        ));
    }
}
