use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cache::{CacheOptions, QueryCache};
use crate::config::FilterConfig;
use crate::error::{AppError, Result};
use crate::fetch::{ListingQuery, MarketApi, MarketRecord, RetryPolicy};

/// Minimum retention for escalated listings.
const REMOTE_RETAIN_FLOOR: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterType {
    #[default]
    All,
    Winners,
    Losers,
    Volume,
}

pub const FILTER_TYPES: &[FilterType] = &[
    FilterType::All,
    FilterType::Winners,
    FilterType::Losers,
    FilterType::Volume,
];

impl FilterType {
    pub const fn tag(self) -> &'static str {
        match self {
            FilterType::All => "all",
            FilterType::Winners => "winners",
            FilterType::Losers => "losers",
            FilterType::Volume => "volume",
        }
    }

    fn field(self, record: &MarketRecord) -> f64 {
        match self {
            FilterType::All => 0.0,
            FilterType::Winners | FilterType::Losers => record.change_pct(),
            FilterType::Volume => record.volume(),
        }
    }

    fn ordering(self, a: &MarketRecord, b: &MarketRecord) -> Ordering {
        let (a, b) = (self.field(a), self.field(b));
        match self {
            FilterType::All => Ordering::Equal,
            FilterType::Losers => a.total_cmp(&b),
            FilterType::Winners | FilterType::Volume => b.total_cmp(&a),
        }
    }

    fn has_required_sign(self, value: f64) -> bool {
        match self {
            FilterType::Winners => value > 0.0,
            FilterType::Losers => value < 0.0,
            FilterType::All | FilterType::Volume => true,
        }
    }

    fn is_beyond(self, value: f64, threshold: f64) -> bool {
        match self {
            FilterType::All => true,
            FilterType::Losers => value <= threshold,
            FilterType::Winners | FilterType::Volume => value >= threshold,
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for FilterType {
    type Err = AppError;

    fn from_str(tag: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = tag.trim().to_lowercase();
        FILTER_TYPES
            .iter()
            .copied()
            .find(|filter| filter.tag() == normalized)
            .ok_or_else(|| AppError::configuration(format!("unknown filter `{}`", tag.trim())))
    }
}

/// Filter tag plus the threshold derived from the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub filter_type: FilterType,
    pub threshold: f64,
}

/// Outcome of resolving one filter selection.
#[derive(Debug, Clone)]
pub struct FilterResolution {
    pub records: Vec<MarketRecord>,
    pub spec: FilterSpec,
    /// The displayed records came from the local snapshot.
    pub is_client_filtering: bool,
    /// Stage 1 was too thin and a remote query is required.
    pub needs_api_call: bool,
    /// A remote query is still pending; the records are the interim local result.
    pub is_loading: bool,
    pub count: usize,
    pub threshold: f64,
    /// Stage-2 failure, reported alongside the still-displayed local records.
    pub error: Option<AppError>,
}

impl FilterResolution {
    fn local(stage: LocalStage, filter_type: FilterType, needs_api_call: bool) -> Self {
        let count = stage.records.len();
        Self {
            records: stage.records,
            spec: FilterSpec {
                filter_type,
                threshold: stage.threshold,
            },
            is_client_filtering: true,
            needs_api_call,
            is_loading: false,
            count,
            threshold: stage.threshold,
            error: None,
        }
    }

    fn remote(records: Vec<MarketRecord>, filter_type: FilterType, threshold: f64) -> Self {
        let count = records.len();
        Self {
            records,
            spec: FilterSpec {
                filter_type,
                threshold,
            },
            is_client_filtering: false,
            needs_api_call: true,
            is_loading: false,
            count,
            threshold,
            error: None,
        }
    }
}

/// Stage-1 output.
#[derive(Debug, Clone)]
pub struct LocalStage {
    pub records: Vec<MarketRecord>,
    pub threshold: f64,
}

fn sorted_for(records: &[MarketRecord], filter_type: FilterType) -> Vec<MarketRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| filter_type.ordering(a, b));
    sorted
}

/// Value at index `ceil(len * percentage)` of the filter's sort order.
pub fn dynamic_threshold(records: &[MarketRecord], filter_type: FilterType, percentage: f64) -> f64 {
    if filter_type == FilterType::All || records.is_empty() {
        return 0.0;
    }
    let sorted = sorted_for(records, filter_type);
    let index = ((sorted.len() as f64) * percentage).ceil() as usize;
    let index = index.min(sorted.len() - 1);
    filter_type.field(&sorted[index])
}

/// Stage 1: threshold plus sign predicate over the local snapshot.
pub fn filter_local(records: &[MarketRecord], filter_type: FilterType, percentage: f64) -> LocalStage {
    if filter_type == FilterType::All {
        return LocalStage {
            records: records.to_vec(),
            threshold: 0.0,
        };
    }

    let threshold = dynamic_threshold(records, filter_type, percentage);
    let records = sorted_for(records, filter_type)
        .into_iter()
        .filter(|record| {
            let value = filter_type.field(record);
            filter_type.is_beyond(value, threshold) && filter_type.has_required_sign(value)
        })
        .collect();

    LocalStage { records, threshold }
}

/// Stage 2 predicate: sort and sign filter without the percentile cutoff.
pub fn filter_remote(records: &[MarketRecord], filter_type: FilterType) -> Vec<MarketRecord> {
    if filter_type == FilterType::All {
        return records.to_vec();
    }
    sorted_for(records, filter_type)
        .into_iter()
        .filter(|record| filter_type.has_required_sign(filter_type.field(record)))
        .collect()
}

pub fn needs_remote(filter_type: FilterType, local_count: usize, min_results: usize) -> bool {
    filter_type != FilterType::All && local_count < min_results
}

/// Two-stage filter resolution over the listing snapshot.
///
/// Stage 1 filters the locally held page against a percentile-derived
/// threshold. When that leaves fewer than `min_results_threshold` records the
/// resolver escalates to a wider listing fetched through the cache and applies
/// the same sort and sign predicate there.
pub struct FilterResolver {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    cache: QueryCache<Vec<MarketRecord>>,
    config: FilterConfig,
    remote_query: ListingQuery,
}

impl FilterResolver {
    pub fn new(
        api: Arc<dyn MarketApi>,
        retry: RetryPolicy,
        cache: QueryCache<Vec<MarketRecord>>,
        config: FilterConfig,
        remote_query: ListingQuery,
    ) -> Self {
        Self {
            api,
            retry,
            cache,
            config,
            remote_query,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn remote_key(&self, filter_type: FilterType) -> String {
        format!(
            "filter:{}:{}:{}",
            filter_type.tag(),
            self.remote_query.currency,
            self.remote_query.page_size
        )
    }

    fn remote_options(&self) -> CacheOptions {
        let fresh = self.config.cache_time;
        CacheOptions::new(fresh, fresh.max(REMOTE_RETAIN_FLOOR))
    }

    fn stage_one(&self, snapshot: &[MarketRecord], filter_type: FilterType) -> (LocalStage, bool) {
        let stage = filter_local(snapshot, filter_type, self.config.dynamic_threshold_percentage);
        let escalate = needs_remote(filter_type, stage.records.len(), self.config.min_results_threshold);
        if escalate {
            log::debug!(
                "{filter_type}: {} local matches below minimum {}; escalating",
                stage.records.len(),
                self.config.min_results_threshold
            );
        }
        (stage, escalate)
    }

    fn remote_fetcher(
        &self,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<MarketRecord>>> {
        let api = Arc::clone(&self.api);
        let retry = self.retry.clone();
        let query = self.remote_query.clone();
        move || {
            async move { retry.run(|| api.fetch_listing(query.clone())).await }.boxed()
        }
    }

    /// Resolve without waiting. When escalation is required and the remote
    /// listing has not landed yet, the Stage-1 records are returned as an
    /// interim result and the remote fetch is started in the background.
    pub fn resolve(&self, snapshot: &[MarketRecord], filter_type: FilterType) -> FilterResolution {
        let (stage, escalate) = self.stage_one(snapshot, filter_type);
        if !escalate {
            return FilterResolution::local(stage, filter_type, false);
        }

        let key = self.remote_key(filter_type);
        let options = self.remote_options();

        if let Some(cached) = self.cache.peek(&key, options) {
            if cached.is_stale {
                self.cache.prefetch(&key, options, self.remote_fetcher());
            }
            let mut resolution = FilterResolution::remote(
                filter_remote(&cached.value, filter_type),
                filter_type,
                stage.threshold,
            );
            resolution.error = self.cache.last_error(&key);
            return resolution;
        }

        let mut resolution = FilterResolution::local(stage, filter_type, true);
        match self.cache.last_error(&key) {
            Some(err) if !self.cache.is_fetching(&key) => {
                resolution.error = Some(err);
            }
            _ => {
                self.cache.prefetch(&key, options, self.remote_fetcher());
                resolution.is_loading = true;
            }
        }
        resolution
    }

    /// Resolve, awaiting the remote stage when escalation is required.
    pub async fn resolve_settled(
        &self,
        snapshot: &[MarketRecord],
        filter_type: FilterType,
    ) -> FilterResolution {
        let (stage, escalate) = self.stage_one(snapshot, filter_type);
        if !escalate {
            return FilterResolution::local(stage, filter_type, false);
        }

        let key = self.remote_key(filter_type);
        let options = self.remote_options();
        match self.cache.get(&key, options, self.remote_fetcher()).await {
            Ok(mut cached) => {
                if cached.is_stale {
                    self.cache.wait(&key).await;
                    cached = self.cache.peek(&key, options).unwrap_or(cached);
                }
                let mut resolution = FilterResolution::remote(
                    filter_remote(&cached.value, filter_type),
                    filter_type,
                    stage.threshold,
                );
                resolution.error = self.cache.last_error(&key);
                resolution
            }
            Err(err) => {
                log::warn!("{filter_type}: remote listing failed, keeping local results: {err}");
                let mut resolution = FilterResolution::local(stage, filter_type, true);
                resolution.error = Some(err);
                resolution
            }
        }
    }

    /// Drop every escalated listing so the next resolution refetches.
    pub fn invalidate(&self) {
        self.cache.invalidate_prefix("filter:");
    }

    /// Mark escalated listings stale; they stay displayed until a refetch lands.
    pub fn revalidate(&self) {
        self.cache.revalidate_prefix("filter:");
    }
}
