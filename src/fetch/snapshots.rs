use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::FetchResult;

/// Canonical representation of a single coin row returned by the listing endpoint.
///
/// Records are replaced wholesale on every fetch and never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
}

impl MarketRecord {
    /// 24h percentage change, treating a missing value as flat.
    pub fn change_pct(&self) -> f64 {
        self.price_change_percentage_24h
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn volume(&self) -> f64 {
        self.total_volume.filter(|v| v.is_finite()).unwrap_or(0.0)
    }
}

/// Parameters of one listing page request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingQuery {
    pub page: u32,
    pub page_size: u32,
    pub currency: String,
}

impl ListingQuery {
    pub fn new(page: u32, page_size: u32, currency: impl Into<String>) -> Self {
        Self {
            page: page.max(1),
            page_size,
            currency: currency.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        format!("listing:{}:{}:{}", self.currency, self.page, self.page_size)
    }
}

/// Decode a listing body. Rows lacking identity fields are skipped rather than failing the page.
pub fn parse_listing(body: &str) -> FetchResult<Vec<MarketRecord>> {
    let root: serde_json::Value = serde_json::from_str(body)?;
    let Some(rows) = root.as_array() else {
        return Err(AppError::server_failure(
            None,
            "listing payload is not an array",
        ));
    };

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<MarketRecord>(row.clone()) {
            Ok(record) if !record.id.is_empty() => records.push(record),
            Ok(_) => continue,
            Err(err) => log::debug!("skipping malformed listing row: {err}"),
        }
    }

    Ok(records)
}
