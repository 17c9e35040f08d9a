use std::time::Duration;

/// Progress observation emitted while idling
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Remaining time as `MM:SS`
    pub remaining_label: String,
    /// Share of the idle duration already elapsed, 0..=100
    pub percent: f64,
}

impl Progress {
    pub fn new(elapsed: Duration, duration: Duration) -> Self {
        Self {
            remaining_label: format_remaining(elapsed, duration),
            percent: percent_complete(elapsed, duration),
        }
    }
}

/// Whole seconds left, rounded to the nearest second and never negative
pub fn remaining_secs(elapsed: Duration, duration: Duration) -> u64 {
    let left = duration.as_secs_f64() - elapsed.as_secs_f64();
    if left <= 0.0 {
        0
    } else {
        left.round() as u64
    }
}

/// Format the remaining time as zero-padded `MM:SS`. Minutes are not capped.
pub fn format_remaining(elapsed: Duration, duration: Duration) -> String {
    let left = remaining_secs(elapsed, duration);
    format!("{:02}:{:02}", left / 60, left % 60)
}

pub fn percent_complete(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 100.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64() * 100.0).clamp(0.0, 100.0)
}
