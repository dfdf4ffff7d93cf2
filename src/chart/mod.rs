pub mod downsample;
pub mod state;
pub mod timeframe;

pub use downsample::{downsample, sanitize_series, trim_to_window, validate_series};
pub use state::{prepare_series, ChartSnapshot, ChartState, SeriesKey};
pub use timeframe::{optimal_points_for_tag, Timeframe, DEFAULT_OPTIMAL_POINTS, TIMEFRAMES};
