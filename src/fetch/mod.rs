use futures::future::BoxFuture;

use crate::chart::Timeframe;
use crate::error::Result;

pub mod history;
pub mod request;
pub mod retry;
pub mod search;
pub mod snapshots;

#[cfg(test)]
pub(crate) mod fake;

pub use history::{parse_market_chart, RawSeries, Series, SeriesPoint};
pub use request::HttpMarketApi;
pub use retry::{with_retry, RetryPolicy};
pub use search::{parse_search, SearchHit};
pub use snapshots::{parse_listing, ListingQuery, MarketRecord};

pub type FetchResult<T> = Result<T>;

/// Read-only view of the upstream market-data API.
///
/// Every call issues exactly one request and classifies its failure;
/// retrying belongs to [`RetryPolicy`]. Futures are `'static` so callers can
/// share or spawn them.
pub trait MarketApi: Send + Sync + 'static {
    fn fetch_listing(&self, query: ListingQuery) -> BoxFuture<'static, FetchResult<Vec<MarketRecord>>>;

    fn fetch_series(
        &self,
        coin_id: &str,
        timeframe: Timeframe,
        currency: &str,
    ) -> BoxFuture<'static, FetchResult<RawSeries>>;

    fn search(&self, query: &str) -> BoxFuture<'static, FetchResult<Vec<SearchHit>>>;
}
