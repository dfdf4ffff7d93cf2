use crate::fetch::{Series, SeriesPoint};

/// Reduce `series` to at most `max_points` points while keeping its shape.
///
/// Inputs already within the budget are returned unchanged. Otherwise the
/// first and last points are kept and `max_points - 2` contiguous buckets of
/// `len / max_points` interior points each, starting right after the first
/// point, contribute the point deviating most from
/// the bucket mean, so spikes and dips survive. Budgets below two are treated
/// as two.
pub fn downsample(series: &[SeriesPoint], max_points: usize) -> Series {
    if series.len() <= max_points {
        return series.to_vec();
    }

    let max_points = max_points.max(2);
    if series.len() <= max_points {
        return series.to_vec();
    }

    let len = series.len();
    let bucket_size = len / max_points;
    let mut reduced = Vec::with_capacity(max_points);
    reduced.push(series[0]);

    for bucket_idx in 0..max_points - 2 {
        let start = 1 + bucket_idx * bucket_size;
        let end = (start + bucket_size).min(len - 1);
        if start >= end {
            break;
        }
        if let Some(point) = most_deviant(&series[start..end]) {
            reduced.push(point);
        }
    }

    reduced.push(series[len - 1]);
    reduced
}

fn most_deviant(bucket: &[SeriesPoint]) -> Option<SeriesPoint> {
    if bucket.is_empty() {
        return None;
    }
    let mean = bucket.iter().map(|p| p.value).sum::<f64>() / bucket.len() as f64;

    let mut best = bucket[0];
    let mut best_dev = (best.value - mean).abs();
    for point in &bucket[1..] {
        let dev = (point.value - mean).abs();
        if dev > best_dev {
            best = *point;
            best_dev = dev;
        }
    }
    Some(best)
}

/// A series is usable when it holds at least one point with a finite value
/// and a positive timestamp.
pub fn validate_series(series: &[SeriesPoint]) -> bool {
    series.iter().any(SeriesPoint::is_valid)
}

/// Keep only valid points, in timestamp order.
pub fn sanitize_series(series: &[SeriesPoint]) -> Series {
    let mut clean: Series = series.iter().copied().filter(SeriesPoint::is_valid).collect();
    clean.sort_by_key(|point| point.timestamp);
    clean
}

/// Keep the trailing `window_ms` of the series, measured from its last point.
pub fn trim_to_window(series: &[SeriesPoint], window_ms: i64) -> Series {
    let Some(last) = series.last() else {
        return Vec::new();
    };
    let cutoff = last.timestamp - window_ms;
    let trimmed: Series = series
        .iter()
        .copied()
        .filter(|point| point.timestamp >= cutoff)
        .collect();

    if trimmed.len() < 2 {
        series.to_vec()
    } else {
        trimmed
    }
}
