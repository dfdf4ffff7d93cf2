use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, Url};

use crate::chart::Timeframe;
use crate::config::ApiConfig;
use crate::error::{AppError, Context};

use super::history::{parse_market_chart, RawSeries};
use super::search::{parse_search, SearchHit};
use super::snapshots::{parse_listing, ListingQuery, MarketRecord};
use super::{FetchResult, MarketApi};

const CLIENT_USER_AGENT: &str = concat!("coin-pulse/", env!("CARGO_PKG_VERSION"));

/// Stateless HTTP transport for the market-data API. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct HttpMarketApi {
    client: Client,
    base_url: Url,
}

impl HttpMarketApi {
    pub fn new(config: &ApiConfig) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to construct market data HTTP client")?;

        let base_url = Url::parse(&config.base_url).map_err(|err| {
            AppError::configuration(format!("invalid base url `{}`: {err}", config.base_url))
        })?;

        Ok(Self { client, base_url })
    }

    /// Append percent-encoded `segments` to the base path.
    fn endpoint(&self, segments: &[&str]) -> FetchResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AppError::configuration(format!("base url `{}` cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_text(&self, segments: &[&str], query: &[(&str, String)]) -> FetchResult<String> {
        let response = self
            .client
            .get(self.endpoint(segments)?)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        read_success_body(response).await
    }
}

/// Classify the status and read the body of a successful response.
async fn read_success_body(response: Response) -> FetchResult<String> {
    let status = response.status();
    if !status.is_success() {
        log::debug!("upstream responded with {status}");
        return Err(AppError::from_status(status));
    }

    response
        .text()
        .await
        .map_err(|err| AppError::server_failure(Some(status.as_u16()), err.to_string()))
}

impl MarketApi for HttpMarketApi {
    fn fetch_listing(&self, query: ListingQuery) -> BoxFuture<'static, FetchResult<Vec<MarketRecord>>> {
        let this = self.clone();
        async move {
            let params = [
                ("vs_currency", query.currency.clone()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", query.page_size.to_string()),
                ("page", query.page.to_string()),
                ("sparkline", "false".to_string()),
                ("price_change_percentage", "24h".to_string()),
            ];
            let body = this.get_text(&["coins", "markets"], &params).await?;
            parse_listing(&body)
        }
        .boxed()
    }

    fn fetch_series(
        &self,
        coin_id: &str,
        timeframe: Timeframe,
        currency: &str,
    ) -> BoxFuture<'static, FetchResult<RawSeries>> {
        let this = self.clone();
        let coin_id = coin_id.to_string();
        let params = [
            ("vs_currency", currency.to_string()),
            ("days", timeframe.days_param().to_string()),
        ];
        async move {
            let body = this.get_text(&["coins", coin_id.as_str(), "market_chart"], &params).await?;
            parse_market_chart(&body)
        }
        .boxed()
    }

    fn search(&self, query: &str) -> BoxFuture<'static, FetchResult<Vec<SearchHit>>> {
        let this = self.clone();
        let params = [("query", query.to_string())];
        async move {
            let body = this.get_text(&["search"], &params).await?;
            parse_search(&body)
        }
        .boxed()
    }
}
