pub mod time;

pub use time::{format_clock, format_countdown, format_last_refresh};
