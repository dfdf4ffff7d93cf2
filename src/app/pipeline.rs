use std::sync::Arc;

use crate::cache::{CacheOptions, QueryCache};
use crate::chart::{ChartState, SeriesKey, Timeframe};
use crate::config::{validate_config, PipelineConfig};
use crate::error::Result;
use crate::fetch::{HttpMarketApi, ListingQuery, MarketApi, MarketRecord, RetryPolicy, Series};
use crate::filter::{FilterResolver, FilterType};

use super::search::SearchDebouncer;
use super::state::{DashboardState, DataStatus, ListingView};

/// Session-wide context: one transport, one set of caches, one resolver.
/// Built once at startup and shared by reference.
pub struct MarketPipeline {
    config: PipelineConfig,
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    listings: QueryCache<Vec<MarketRecord>>,
    series: QueryCache<Series>,
    filters: FilterResolver,
    chart: ChartState,
    search: SearchDebouncer,
}

impl MarketPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        validate_config(&config)?;
        let api = Arc::new(HttpMarketApi::new(&config.api)?);
        Ok(Self::assemble(config, api))
    }

    /// Build around a caller-supplied transport.
    pub fn with_api(config: PipelineConfig, api: Arc<dyn MarketApi>) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self::assemble(config, api))
    }

    fn assemble(config: PipelineConfig, api: Arc<dyn MarketApi>) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let series = QueryCache::new();
        let remote_query = ListingQuery::new(1, config.remote_page_size(), config.api.currency.clone());

        Self {
            filters: FilterResolver::new(
                Arc::clone(&api),
                retry.clone(),
                QueryCache::new(),
                config.filter.clone(),
                remote_query,
            ),
            chart: ChartState::new(Arc::clone(&api), retry.clone(), series.clone()),
            search: SearchDebouncer::new(Arc::clone(&api), retry.clone(), config.search.clone()),
            listings: QueryCache::new(),
            series,
            api,
            retry,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn chart(&self) -> &ChartState {
        &self.chart
    }

    pub fn search(&self) -> &SearchDebouncer {
        &self.search
    }

    pub fn filters(&self) -> &FilterResolver {
        &self.filters
    }

    fn listing_options(&self) -> CacheOptions {
        let fresh = self.config.refresh_interval;
        CacheOptions::new(fresh, fresh * 5)
    }

    /// One page of the market listing, through the listing cache. A stale page
    /// is returned at once while it refreshes in the background.
    pub async fn listing(&self, page: u32) -> ListingView {
        self.read_listing(page, false).await
    }

    /// Like [`listing`](Self::listing) but waits for a pending refresh of a
    /// stale page. A failed refresh leaves the previous page in place.
    pub async fn listing_settled(&self, page: u32) -> ListingView {
        self.read_listing(page, true).await
    }

    async fn read_listing(&self, page: u32, settle: bool) -> ListingView {
        let query = ListingQuery::new(page, self.config.api.page_size, self.config.api.currency.clone());
        let key = query.cache_key();
        let options = self.listing_options();
        let fetcher = {
            let api = Arc::clone(&self.api);
            let retry = self.retry.clone();
            let query = query.clone();
            move || async move { retry.run(|| api.fetch_listing(query.clone())).await }
        };

        let mut outcome = self.listings.get(&key, options, fetcher).await;
        if settle && matches!(&outcome, Ok(cached) if cached.is_stale) {
            self.listings.wait(&key).await;
            if let Some(latest) = self.listings.peek(&key, options) {
                outcome = Ok(latest);
            }
        }

        let mut view = ListingView::from_outcome(query.page, outcome);
        match &view.error {
            Some(err) => log::warn!("listing page {page} unavailable: {err}"),
            None if view.status == DataStatus::StaleLocal => {
                view.error = self.listings.last_error(&key);
            }
            None => {}
        }
        view
    }

    /// First listing page with `filter_type` resolved against it. A required
    /// remote query is started but not awaited.
    pub async fn dashboard(&self, filter_type: FilterType) -> DashboardState {
        let listing = self.listing(1).await;
        let filter = self.filters.resolve(&listing.records, filter_type);
        DashboardState::new(listing, filter)
    }

    /// Like [`dashboard`](Self::dashboard) but waits for pending listing and
    /// remote filter queries.
    pub async fn dashboard_settled(&self, filter_type: FilterType) -> DashboardState {
        let listing = self.listing_settled(1).await;
        let filter = self.filters.resolve_settled(&listing.records, filter_type).await;
        DashboardState::new(listing, filter)
    }

    /// Select and load a coin's chart in the pipeline's currency.
    pub async fn load_series(&self, coin_id: &str, timeframe: Timeframe) -> Result<Option<Series>> {
        let key = SeriesKey::new(coin_id, timeframe, self.config.api.currency.clone());
        self.chart.load(key).await
    }

    /// Scheduler hook: mark listings and escalated filter results stale so the
    /// next read refetches while still serving them, and evict anything past
    /// retention.
    pub fn refresh_all(&self) {
        self.listings.revalidate_prefix("listing:");
        self.filters.revalidate();
        let purged = self.listings.purge_expired() + self.series.purge_expired();
        log::debug!("refresh marked listings stale; purged {purged} expired entries");
    }
}
