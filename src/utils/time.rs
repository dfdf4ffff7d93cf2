use chrono::{DateTime, Local};

/// `HH:MM:SS` label used for "last updated" displays.
pub fn format_clock(time: DateTime<Local>) -> String {
    time.format("%H:%M:%S").to_string()
}

pub fn format_last_refresh(time: Option<DateTime<Local>>) -> String {
    time.map(format_clock).unwrap_or_else(|| "never".to_string())
}

/// Render a countdown in seconds as `m:ss`.
pub fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
