use serde_json::Value;

use crate::error::AppError;

use super::FetchResult;

/// One sample of a time series: epoch-millis timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: i64,
    pub value: f64,
}

impl SeriesPoint {
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Finite value and positive timestamp.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.timestamp > 0
    }
}

/// Timestamp-ordered sequence of points.
pub type Series = Vec<SeriesPoint>;

/// Series exactly as decoded from the upstream, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub prices: Series,
    pub market_caps: Series,
    pub total_volumes: Series,
}

/// Decode a `market_chart` body. Null values become NaN so validation can judge them.
pub fn parse_market_chart(body: &str) -> FetchResult<RawSeries> {
    let root: Value = serde_json::from_str(body)?;
    if !root.is_object() {
        return Err(AppError::server_failure(
            None,
            "market chart payload is not an object",
        ));
    }

    let prices = match root.get("prices") {
        Some(Value::Array(rows)) => parse_pairs(rows),
        Some(_) => {
            return Err(AppError::server_failure(
                None,
                "market chart prices is not an array",
            ))
        }
        None => Vec::new(),
    };

    let optional = |key: &str| {
        root.get(key)
            .and_then(Value::as_array)
            .map(|rows| parse_pairs(rows))
            .unwrap_or_default()
    };

    let mut series = RawSeries {
        prices,
        market_caps: optional("market_caps"),
        total_volumes: optional("total_volumes"),
    };

    for points in [
        &mut series.prices,
        &mut series.market_caps,
        &mut series.total_volumes,
    ] {
        points.sort_by_key(|point| point.timestamp);
    }

    Ok(series)
}

fn parse_pairs(rows: &[Value]) -> Series {
    rows.iter()
        .filter_map(|row| {
            let pair = row.as_array()?;
            let timestamp = pair.first().and_then(json_timestamp)?;
            let value = pair.get(1).map(json_value).unwrap_or(f64::NAN);
            Some(SeriesPoint { timestamp, value })
        })
        .collect()
}

fn json_timestamp(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn json_value(value: &Value) -> f64 {
    match value {
        Value::Number(num) => num.as_f64().unwrap_or(f64::NAN),
        Value::String(raw) => raw.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}
