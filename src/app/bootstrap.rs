use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use crate::app::pipeline::MarketPipeline;
use crate::app::state::DashboardState;
use crate::chart::Timeframe;
use crate::config::load_config;
use crate::error::{Context, Result};
use crate::filter::FilterType;
use crate::scheduler::RefreshScheduler;
use crate::utils::{format_countdown, format_last_refresh};

pub const CONFIG_ENV: &str = "COIN_PULSE_CONFIG";
pub const FILTER_ENV: &str = "COIN_PULSE_FILTER";
pub const COIN_ENV: &str = "COIN_PULSE_COIN";
pub const TIMEFRAME_ENV: &str = "COIN_PULSE_TIMEFRAME";

const REPORT_ROWS: usize = 10;

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Dashboard selections taken from the environment.
#[derive(Debug, Clone, PartialEq)]
struct Selection {
    filter: FilterType,
    coin: Option<String>,
    timeframe: Timeframe,
}

impl Selection {
    fn from_env() -> Result<Self> {
        let filter = env_value(FILTER_ENV)
            .map(|tag| tag.parse::<FilterType>())
            .transpose()?
            .unwrap_or_default();
        let timeframe = env_value(TIMEFRAME_ENV)
            .map(|tag| tag.parse::<Timeframe>())
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            filter,
            coin: env_value(COIN_ENV),
            timeframe,
        })
    }
}

/// Entry point used by `main`: build the session pipeline, poll until ctrl-c.
pub async fn run() -> Result<()> {
    let config_path = env_value(CONFIG_ENV).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    let selection = Selection::from_env()?;
    let pipeline = Arc::new(MarketPipeline::new(config)?);

    log::info!(
        "watching {} filter against {}",
        selection.filter,
        pipeline.config().api.base_url
    );
    refresh_cycle(&pipeline, &selection).await;

    let scheduler = {
        let pipeline = Arc::clone(&pipeline);
        let selection = selection.clone();
        RefreshScheduler::start(pipeline.config().refresh_interval, move || {
            let pipeline = Arc::clone(&pipeline);
            let selection = selection.clone();
            async move {
                pipeline.refresh_all();
                refresh_cycle(&pipeline, &selection).await;
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let state = scheduler.state();
    log::info!(
        "shutting down after {} refreshes (last at {}, next in {})",
        state.refresh_count,
        format_last_refresh(state.last_refresh),
        format_countdown(state.countdown_secs)
    );
    scheduler.shutdown();
    Ok(())
}

async fn refresh_cycle(pipeline: &MarketPipeline, selection: &Selection) {
    let dashboard = pipeline.dashboard_settled(selection.filter).await;
    report(&dashboard);

    if let Some(coin) = &selection.coin {
        match pipeline.load_series(coin, selection.timeframe).await {
            Ok(Some(series)) => {
                if let (Some(first), Some(last)) = (series.first(), series.last()) {
                    log::info!(
                        "{coin} {}: {} points, {:.4} -> {:.4}",
                        selection.timeframe,
                        series.len(),
                        first.value,
                        last.value
                    );
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("{coin} chart unavailable: {}", err.user_message()),
        }
    }
}

fn report(dashboard: &DashboardState) {
    let filter = &dashboard.filter;
    log::info!(
        "{} [{}]: {} records (threshold {:.2}, {})",
        dashboard.filter_type(),
        dashboard.status(),
        filter.count,
        filter.threshold,
        if filter.is_client_filtering { "local" } else { "remote" }
    );
    if let Some(message) = dashboard.user_message() {
        log::warn!("{message}");
    }
    for record in dashboard.records().iter().take(REPORT_ROWS) {
        log::info!(
            "  {:>4} {:<8} {:>14.4} {:>+8.2}% vol {:.0}",
            record
                .market_cap_rank
                .map(|rank| rank.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.symbol.to_uppercase(),
            record.current_price.unwrap_or(f64::NAN),
            record.change_pct(),
            record.volume()
        );
    }
}
