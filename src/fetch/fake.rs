use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::chart::Timeframe;
use crate::error::AppError;

use super::{FetchResult, ListingQuery, MarketApi, MarketRecord, RawSeries, SearchHit, SeriesPoint};

type ListingFn = dyn Fn(&ListingQuery) -> FetchResult<Vec<MarketRecord>> + Send + Sync;
type SeriesFn = dyn Fn(&str, Timeframe) -> FetchResult<RawSeries> + Send + Sync;
type SearchFn = dyn Fn(&str) -> FetchResult<Vec<SearchHit>> + Send + Sync;

/// In-memory `MarketApi` used by unit tests across the crate.
pub(crate) struct FakeMarketApi {
    listing: Box<ListingFn>,
    series: Box<SeriesFn>,
    search: Box<SearchFn>,
    pub delay: Duration,
    pub listing_calls: AtomicUsize,
    pub series_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub listing_queries: Mutex<Vec<ListingQuery>>,
    pub search_queries: Mutex<Vec<String>>,
}

impl FakeMarketApi {
    pub fn new() -> Self {
        Self {
            listing: Box::new(|_| Ok(Vec::new())),
            series: Box::new(|_, _| Ok(RawSeries::default())),
            search: Box::new(|_| Ok(Vec::new())),
            delay: Duration::ZERO,
            listing_calls: AtomicUsize::new(0),
            series_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            listing_queries: Mutex::new(Vec::new()),
            search_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_listing<F>(mut self, f: F) -> Self
    where
        F: Fn(&ListingQuery) -> FetchResult<Vec<MarketRecord>> + Send + Sync + 'static,
    {
        self.listing = Box::new(f);
        self
    }

    pub fn with_series<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Timeframe) -> FetchResult<RawSeries> + Send + Sync + 'static,
    {
        self.series = Box::new(f);
        self
    }

    pub fn with_search<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> FetchResult<Vec<SearchHit>> + Send + Sync + 'static,
    {
        self.search = Box::new(f);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn series_calls(&self) -> usize {
        self.series_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn respond<T: Send + 'static>(&self, result: FetchResult<T>) -> BoxFuture<'static, FetchResult<T>> {
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

impl MarketApi for FakeMarketApi {
    fn fetch_listing(&self, query: ListingQuery) -> BoxFuture<'static, FetchResult<Vec<MarketRecord>>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.listing_queries.lock().unwrap().push(query.clone());
        self.respond((self.listing)(&query))
    }

    fn fetch_series(
        &self,
        coin_id: &str,
        timeframe: Timeframe,
        _currency: &str,
    ) -> BoxFuture<'static, FetchResult<RawSeries>> {
        self.series_calls.fetch_add(1, Ordering::SeqCst);
        self.respond((self.series)(coin_id, timeframe))
    }

    fn search(&self, query: &str) -> BoxFuture<'static, FetchResult<Vec<SearchHit>>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.search_queries.lock().unwrap().push(query.to_string());
        self.respond((self.search)(query))
    }
}

pub(crate) fn record(id: &str, change_pct: f64, volume: f64) -> MarketRecord {
    MarketRecord {
        id: id.to_string(),
        symbol: id.to_uppercase(),
        name: id.to_string(),
        image: None,
        current_price: Some(1.0),
        price_change_24h: Some(change_pct / 100.0),
        price_change_percentage_24h: Some(change_pct),
        market_cap: Some(volume * 10.0),
        total_volume: Some(volume),
        market_cap_rank: None,
    }
}

pub(crate) fn linear_prices(len: usize) -> RawSeries {
    RawSeries {
        prices: (0..len)
            .map(|i| SeriesPoint::new(1_700_000_000_000 + i as i64 * 60_000, 100.0 + i as f64))
            .collect(),
        ..RawSeries::default()
    }
}

pub(crate) fn server_down() -> AppError {
    AppError::server_failure(Some(503), "unavailable")
}
