use std::time::Duration;

pub mod loader;
pub mod validator;

pub use loader::{load_config, load_config_from_str};
pub use validator::validate_config;

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_CURRENCY: &str = "usd";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream endpoint settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub currency: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Knobs for the two-stage filter resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Stage-1 results below this count escalate to a remote query.
    pub min_results_threshold: usize,
    /// Freshness window for escalated remote listings.
    pub cache_time: Duration,
    /// Fraction of the snapshot used to place the dynamic threshold.
    pub dynamic_threshold_percentage: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_results_threshold: 5,
            cache_time: Duration::from_millis(120_000),
            dynamic_threshold_percentage: 0.10,
        }
    }
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub debounce: Duration,
    pub min_query_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            min_query_len: 2,
        }
    }
}

/// Complete pipeline configuration. Built once at startup and validated
/// before any component sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub filter: FilterConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    pub refresh_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            filter: FilterConfig::default(),
            retry: RetryConfig::default(),
            search: SearchConfig::default(),
            refresh_interval: Duration::from_millis(60_000),
        }
    }
}

impl PipelineConfig {
    /// Page size used when the filter resolver escalates to the server.
    pub fn remote_page_size(&self) -> u32 {
        self.api.page_size.saturating_mul(2)
    }
}
