use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cache::{CacheEvent, QueryCache};
use crate::error::{AppError, Result};
use crate::fetch::{MarketApi, RetryPolicy, Series, SeriesPoint};

use super::downsample::{downsample, sanitize_series, trim_to_window, validate_series};
use super::Timeframe;

/// Full identity of one chart request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub coin_id: String,
    pub timeframe: Timeframe,
    pub currency: String,
}

impl SeriesKey {
    pub fn new(coin_id: impl Into<String>, timeframe: Timeframe, currency: impl Into<String>) -> Self {
        Self {
            coin_id: coin_id.into(),
            timeframe,
            currency: currency.into(),
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "series:{}:{}:{}",
            self.currency,
            self.coin_id,
            self.timeframe.tag()
        )
    }
}

/// What the chart consumer renders.
#[derive(Debug, Clone, Default)]
pub struct ChartSnapshot {
    pub key: Option<SeriesKey>,
    pub series: Option<Series>,
    pub loading: bool,
    pub is_stale: bool,
    pub error: Option<AppError>,
}

/// Validate, trim and downsample a raw price series for display.
pub fn prepare_series(prices: &[SeriesPoint], timeframe: Timeframe) -> Result<Series> {
    if !validate_series(prices) {
        return Err(AppError::invalid_data(format!(
            "series for {timeframe} has no valid points"
        )));
    }

    let mut clean = sanitize_series(prices);
    if let Some(window) = timeframe.trim_window() {
        clean = trim_to_window(&clean, window.as_millis() as i64);
    }
    Ok(downsample(&clean, timeframe.optimal_points()))
}

struct ChartInner {
    api: Arc<dyn MarketApi>,
    retry: RetryPolicy,
    cache: QueryCache<Series>,
    active: Mutex<Option<SeriesKey>>,
    snapshot_tx: watch::Sender<ChartSnapshot>,
}

/// Tracks the selected series and discards results for keys that are no
/// longer selected when they arrive.
#[derive(Clone)]
pub struct ChartState {
    inner: Arc<ChartInner>,
}

impl ChartState {
    pub fn new(api: Arc<dyn MarketApi>, retry: RetryPolicy, cache: QueryCache<Series>) -> Self {
        let (snapshot_tx, _) = watch::channel(ChartSnapshot::default());
        Self {
            inner: Arc::new(ChartInner {
                api,
                retry,
                cache,
                active: Mutex::new(None),
                snapshot_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChartSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ChartSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn active_key(&self) -> Option<SeriesKey> {
        self.active().clone()
    }

    /// Deselect the current coin; in-flight results will be ignored.
    pub fn clear(&self) {
        *self.active() = None;
        self.inner.snapshot_tx.send_replace(ChartSnapshot::default());
    }

    /// Select `key` and load it in the background.
    pub fn spawn_load(&self, key: SeriesKey) -> JoinHandle<Result<Option<Series>>> {
        let this = self.clone();
        tokio::spawn(async move { this.load(key).await })
    }

    /// Select `key` and load its series. Returns `Ok(None)` when another key
    /// was selected before this one resolved.
    pub async fn load(&self, key: SeriesKey) -> Result<Option<Series>> {
        self.select(&key);

        let cache_key = key.cache_key();
        let events = self.inner.cache.subscribe();
        let fetcher = {
            let api = Arc::clone(&self.inner.api);
            let retry = self.inner.retry.clone();
            let key = key.clone();
            move || async move {
                let raw = retry
                    .run(|| api.fetch_series(&key.coin_id, key.timeframe, &key.currency))
                    .await?;
                prepare_series(&raw.prices, key.timeframe)
            }
        };

        let outcome = self
            .inner
            .cache
            .get(&cache_key, key.timeframe.cache_options(), fetcher)
            .await;

        if !self.is_active(&key) {
            log::debug!("discarding series result for superseded {}", cache_key);
            return Ok(None);
        }

        match outcome {
            Ok(cached) => {
                if cached.is_stale {
                    self.follow_refresh(key.clone(), events);
                }
                self.publish(ChartSnapshot {
                    key: Some(key),
                    series: Some(cached.value.clone()),
                    loading: false,
                    is_stale: cached.is_stale,
                    error: None,
                });
                Ok(Some(cached.value))
            }
            Err(err) => {
                log::warn!("series load failed for {cache_key}: {err}");
                self.publish(ChartSnapshot {
                    key: Some(key),
                    series: None,
                    loading: false,
                    is_stale: false,
                    error: Some(err.clone()),
                });
                Err(err)
            }
        }
    }

    fn select(&self, key: &SeriesKey) {
        let mut active = self.active();
        let previous = self.snapshot();
        *active = Some(key.clone());
        drop(active);

        // Keep showing the previous series for the same key while reloading.
        let series = previous
            .series
            .filter(|_| previous.key.as_ref() == Some(key));
        self.publish(ChartSnapshot {
            key: Some(key.clone()),
            series,
            loading: true,
            is_stale: false,
            error: None,
        });
    }

    /// Re-publish once the background revalidation for `key` lands.
    fn follow_refresh(&self, key: SeriesKey, mut events: broadcast::Receiver<CacheEvent>) {
        let this = self.clone();
        let cache_key = key.cache_key();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.key() == cache_key => {
                        if !this.is_active(&key) {
                            return;
                        }
                        if let CacheEvent::Failed { error, .. } = &event {
                            log::warn!("background refresh of {cache_key} failed: {error}");
                            return;
                        }
                        if let Some(cached) =
                            this.inner.cache.peek(&cache_key, key.timeframe.cache_options())
                        {
                            this.publish(ChartSnapshot {
                                key: Some(key),
                                series: Some(cached.value),
                                loading: false,
                                is_stale: cached.is_stale,
                                error: None,
                            });
                        }
                        return;
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    fn is_active(&self, key: &SeriesKey) -> bool {
        self.active().as_ref() == Some(key)
    }

    fn publish(&self, snapshot: ChartSnapshot) {
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    fn active(&self) -> MutexGuard<'_, Option<SeriesKey>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
