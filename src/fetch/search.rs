use serde::{Deserialize, Serialize};

use super::FetchResult;

/// A coin matched by the free-text search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
    #[serde(default)]
    pub thumb: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    coins: Vec<SearchHit>,
}

pub fn parse_search(body: &str) -> FetchResult<Vec<SearchHit>> {
    let body: SearchBody = serde_json::from_str(body)?;
    Ok(body.coins)
}
