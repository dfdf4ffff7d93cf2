use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheOptions;
use crate::error::AppError;

/// Fallback render density for tags outside the timeframe table.
pub const DEFAULT_OPTIMAL_POINTS: usize = 200;

/// Historical look-back windows offered by the chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    OneHour,
    OneDay,
    SevenDays,
    ThirtyDays,
    OneYear,
}

pub const TIMEFRAMES: &[Timeframe] = &[
    Timeframe::OneHour,
    Timeframe::OneDay,
    Timeframe::SevenDays,
    Timeframe::ThirtyDays,
    Timeframe::OneYear,
];

impl Timeframe {
    pub const fn tag(self) -> &'static str {
        match self {
            Timeframe::OneHour => "1h",
            Timeframe::OneDay => "24h",
            Timeframe::SevenDays => "7d",
            Timeframe::ThirtyDays => "30d",
            Timeframe::OneYear => "1y",
        }
    }

    /// `days` query parameter of the market chart endpoint. The hourly view
    /// requests a day and is trimmed locally.
    pub const fn days_param(self) -> u32 {
        match self {
            Timeframe::OneHour | Timeframe::OneDay => 1,
            Timeframe::SevenDays => 7,
            Timeframe::ThirtyDays => 30,
            Timeframe::OneYear => 365,
        }
    }

    /// Window kept after fetching, when narrower than what was requested.
    pub const fn trim_window(self) -> Option<Duration> {
        match self {
            Timeframe::OneHour => Some(Duration::from_secs(60 * 60)),
            _ => None,
        }
    }

    /// Target point count after downsampling.
    pub const fn optimal_points(self) -> usize {
        match self {
            Timeframe::OneHour => 60,
            Timeframe::OneDay => 96,
            Timeframe::SevenDays => 168,
            Timeframe::ThirtyDays => 180,
            Timeframe::OneYear => 365,
        }
    }

    /// Short windows go stale sooner than long ones.
    pub const fn fresh_for(self) -> Duration {
        match self {
            Timeframe::OneHour => Duration::from_secs(60),
            Timeframe::OneDay => Duration::from_secs(5 * 60),
            Timeframe::SevenDays => Duration::from_secs(15 * 60),
            Timeframe::ThirtyDays => Duration::from_secs(30 * 60),
            Timeframe::OneYear => Duration::from_secs(60 * 60),
        }
    }

    pub fn cache_options(self) -> CacheOptions {
        let fresh = self.fresh_for();
        CacheOptions::new(fresh, fresh * 4)
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::OneDay
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let normalized = tag.trim().to_lowercase();
        TIMEFRAMES
            .iter()
            .copied()
            .find(|tf| tf.tag() == normalized)
            .ok_or_else(|| AppError::configuration(format!("unknown timeframe `{}`", tag.trim())))
    }
}

/// Optimal point count for a raw tag, falling back to the default density.
pub fn optimal_points_for_tag(tag: &str) -> usize {
    tag.parse::<Timeframe>()
        .map(Timeframe::optimal_points)
        .unwrap_or(DEFAULT_OPTIMAL_POINTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn optimal_point_table() {
        assert_eq!(optimal_points_for_tag("1h"), 60);
        assert_eq!(optimal_points_for_tag("24h"), 96);
        assert_eq!(optimal_points_for_tag("7d"), 168);
        assert_eq!(optimal_points_for_tag("30d"), 180);
        assert_eq!(optimal_points_for_tag("1y"), 365);
        assert_eq!(optimal_points_for_tag("max"), DEFAULT_OPTIMAL_POINTS);
    }

    #[test]
    fn unknown_tag_is_a_configuration_error() {
        let err = "5m".parse::<Timeframe>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(" 7D ".parse::<Timeframe>().unwrap(), Timeframe::SevenDays);
    }
}
