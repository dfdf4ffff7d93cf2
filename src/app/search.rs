use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::{CacheOptions, QueryCache};
use crate::config::SearchConfig;
use crate::error::AppError;
use crate::fetch::{MarketApi, RetryPolicy, SearchHit};

const SEARCH_FRESH: Duration = Duration::from_secs(5 * 60);
const SEARCH_RETAIN: Duration = Duration::from_secs(10 * 60);

/// Published after every keystroke and every settled search.
#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub loading: bool,
    pub error: Option<AppError>,
}

struct SearchInner {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    config: SearchConfig,
    cache: QueryCache<Vec<SearchHit>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<SearchState>,
}

/// Debounces free-text queries: a new query cancels the pending timer and
/// only the last query in a burst reaches the network.
#[derive(Clone)]
pub struct SearchDebouncer {
    inner: Arc<SearchInner>,
}

impl SearchDebouncer {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy, config: SearchConfig) -> Self {
        let (state_tx, _) = watch::channel(SearchState::default());
        Self {
            inner: Arc::new(SearchInner {
                api,
                retry,
                config,
                cache: QueryCache::new(),
                pending: Mutex::new(None),
                state_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.inner.state_tx.borrow().clone()
    }

    /// Feed the latest query text.
    pub fn submit(&self, query: &str) {
        let query = query.trim().to_string();
        self.cancel_pending();

        if query.chars().count() < self.inner.config.min_query_len {
            self.inner.state_tx.send_replace(SearchState {
                query,
                ..SearchState::default()
            });
            return;
        }

        self.inner.state_tx.send_modify(|state| {
            state.query = query.clone();
            state.loading = true;
            state.error = None;
        });

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.inner.config.debounce).await;
            this.execute(query).await;
        });
        *self.pending() = Some(handle);
    }

    /// Drop the pending query and clear results.
    pub fn clear(&self) {
        self.cancel_pending();
        self.inner.state_tx.send_replace(SearchState::default());
    }

    async fn execute(&self, query: String) {
        let fetcher = {
            let api = Arc::clone(&self.inner.api);
            let retry = self.inner.retry.clone();
            let query = query.clone();
            move || async move { retry.run(|| api.search(&query)).await }
        };
        let outcome = self
            .inner
            .cache
            .get(
                &format!("search:{}", query.to_lowercase()),
                CacheOptions::new(SEARCH_FRESH, SEARCH_RETAIN),
                fetcher,
            )
            .await;

        self.inner.state_tx.send_if_modified(|state| {
            if state.query != query {
                return false;
            }
            state.loading = false;
            match outcome {
                Ok(cached) => {
                    log::debug!("search `{query}` returned {} hits", cached.value.len());
                    state.hits = cached.value;
                    state.error = None;
                }
                Err(err) => {
                    log::warn!("search `{query}` failed: {err}");
                    state.hits.clear();
                    state.error = Some(err);
                }
            }
            true
        });
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fetch::fake::FakeMarketApi;
    use tokio::time::sleep;

    fn hit(id: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            name: id.to_string(),
            symbol: id.to_uppercase(),
            market_cap_rank: Some(1),
            thumb: None,
        }
    }

    fn debouncer(api: Arc<FakeMarketApi>) -> SearchDebouncer {
        SearchDebouncer::new(api, RetryPolicy::default(), SearchConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn only_last_query_in_burst_is_sent() {
        let api = FakeMarketApi::new()
            .with_search(|q| Ok(vec![hit(q)]))
            .into_arc();
        let search = debouncer(Arc::clone(&api));

        search.submit("bi");
        sleep(Duration::from_millis(100)).await;
        search.submit("bit");
        sleep(Duration::from_millis(100)).await;
        search.submit("bitc");
        assert!(search.state().loading);

        sleep(Duration::from_millis(400)).await;
        assert_eq!(api.search_calls(), 1);
        assert_eq!(*api.search_queries.lock().unwrap(), vec!["bitc".to_string()]);

        let state = search.state();
        assert_eq!(state.query, "bitc");
        assert!(!state.loading);
        assert_eq!(state.hits, vec![hit("bitc")]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_queries_clear_without_request() {
        let api = FakeMarketApi::new()
            .with_search(|q| Ok(vec![hit(q)]))
            .into_arc();
        let search = debouncer(Arc::clone(&api));

        search.submit("eth");
        sleep(Duration::from_millis(400)).await;
        assert_eq!(search.state().hits.len(), 1);

        search.submit(" e ");
        let state = search.state();
        assert!(state.hits.is_empty());
        assert!(!state.loading);
        sleep(Duration::from_millis(400)).await;
        assert_eq!(api.search_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_published() {
        let api = FakeMarketApi::new()
            .with_search(|_| Err(AppError::ClientRejected { status: 400 }))
            .into_arc();
        let search = debouncer(Arc::clone(&api));

        search.submit("doge");
        sleep(Duration::from_millis(400)).await;

        let state = search.state();
        assert!(!state.loading);
        assert_eq!(state.error.map(|e| e.kind()), Some(ErrorKind::ClientRejected));
        assert_eq!(api.search_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_query_is_served_from_cache() {
        let api = FakeMarketApi::new()
            .with_search(|q| Ok(vec![hit(q)]))
            .into_arc();
        let search = debouncer(Arc::clone(&api));

        search.submit("sol");
        sleep(Duration::from_millis(400)).await;
        search.clear();
        assert!(search.state().query.is_empty());
        search.submit("SOL");
        sleep(Duration::from_millis(400)).await;

        assert_eq!(api.search_calls(), 1);
        assert_eq!(search.state().hits, vec![hit("sol")]);
    }
}
