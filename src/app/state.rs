use std::fmt;

use crate::cache::Cached;
use crate::error::{AppError, Result};
use crate::fetch::MarketRecord;
use crate::filter::{FilterResolution, FilterType};

/// Provenance of what the dashboard is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    Loading,
    Error,
    StaleLocal,
    FreshRemote,
}

impl fmt::Display for DataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DataStatus::Loading => "loading",
            DataStatus::Error => "error",
            DataStatus::StaleLocal => "stale-local",
            DataStatus::FreshRemote => "fresh-remote",
        };
        f.write_str(label)
    }
}

/// One listing page as handed to the table.
#[derive(Debug, Clone)]
pub struct ListingView {
    pub page: u32,
    pub records: Vec<MarketRecord>,
    pub status: DataStatus,
    pub error: Option<AppError>,
}

impl ListingView {
    pub fn from_outcome(page: u32, outcome: Result<Cached<Vec<MarketRecord>>>) -> Self {
        match outcome {
            Ok(cached) => Self {
                page,
                status: if cached.is_stale {
                    DataStatus::StaleLocal
                } else {
                    DataStatus::FreshRemote
                },
                records: cached.value,
                error: None,
            },
            Err(err) => Self {
                page,
                records: Vec::new(),
                status: DataStatus::Error,
                error: Some(err),
            },
        }
    }
}

/// Listing snapshot plus the filter resolved against it.
#[derive(Debug, Clone)]
pub struct DashboardState {
    pub listing: ListingView,
    pub filter: FilterResolution,
}

impl DashboardState {
    pub fn new(listing: ListingView, filter: FilterResolution) -> Self {
        Self { listing, filter }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter.spec.filter_type
    }

    pub fn records(&self) -> &[MarketRecord] {
        &self.filter.records
    }

    pub fn status(&self) -> DataStatus {
        if self.listing.error.is_some() || self.filter.error.is_some() {
            DataStatus::Error
        } else if self.filter.is_loading {
            DataStatus::Loading
        } else if self.filter.is_client_filtering {
            self.listing.status
        } else {
            DataStatus::FreshRemote
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        self.filter.error.as_ref().or(self.listing.error.as_ref())
    }

    /// Fixed text safe to show end users.
    pub fn user_message(&self) -> Option<&'static str> {
        self.error().map(AppError::user_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fake::{record, server_down};
    use crate::filter::{filter_local, FilterSpec};
    use tokio::time::Instant;

    fn local_resolution(records: &[MarketRecord]) -> FilterResolution {
        let stage = filter_local(records, FilterType::All, 0.1);
        FilterResolution {
            count: stage.records.len(),
            records: stage.records,
            spec: FilterSpec {
                filter_type: FilterType::All,
                threshold: 0.0,
            },
            is_client_filtering: true,
            needs_api_call: false,
            is_loading: false,
            threshold: 0.0,
            error: None,
        }
    }

    fn cached(records: Vec<MarketRecord>, is_stale: bool) -> Cached<Vec<MarketRecord>> {
        Cached {
            value: records,
            is_stale,
            fetched_at: Instant::now(),
        }
    }

    #[test]
    fn listing_status_follows_staleness() {
        let records = vec![record("btc", 1.0, 10.0)];
        let fresh = ListingView::from_outcome(1, Ok(cached(records.clone(), false)));
        let stale = ListingView::from_outcome(1, Ok(cached(records, true)));
        assert_eq!(fresh.status, DataStatus::FreshRemote);
        assert_eq!(stale.status, DataStatus::StaleLocal);
    }

    #[test]
    fn errors_dominate_status_with_safe_message() {
        let listing = ListingView::from_outcome(1, Err(server_down()));
        let dashboard = DashboardState::new(listing, local_resolution(&[]));

        assert_eq!(dashboard.status(), DataStatus::Error);
        let message = dashboard.user_message().unwrap();
        assert!(!message.contains("503"));
    }

    #[test]
    fn interim_and_remote_results_report_their_source() {
        let records = vec![record("btc", 1.0, 10.0)];
        let listing = ListingView::from_outcome(1, Ok(cached(records.clone(), true)));

        let mut interim = local_resolution(&records);
        interim.is_loading = true;
        assert_eq!(
            DashboardState::new(listing.clone(), interim).status(),
            DataStatus::Loading
        );

        let local = local_resolution(&records);
        assert_eq!(
            DashboardState::new(listing.clone(), local).status(),
            DataStatus::StaleLocal
        );

        let mut remote = local_resolution(&records);
        remote.is_client_filtering = false;
        assert_eq!(
            DashboardState::new(listing, remote).status(),
            DataStatus::FreshRemote
        );
    }
}
