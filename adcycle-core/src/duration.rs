use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

fn duration_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)(\d+)\s*([dhms])").ok())
        .as_ref()
}

/// Parses human durations such as `"6h"`, `"1h 30m"` or `"2d 4h 15m 10s"`.
///
/// Repeated units add up and anything unrecognised yields a zero duration.
pub fn parse_duration(text: &str) -> Duration {
    let Some(pattern) = duration_pattern() else {
        return Duration::ZERO;
    };
    let seconds = pattern
        .captures_iter(text)
        .filter_map(|caps| {
            let value: u64 = caps[1].parse().ok()?;
            let unit = match caps[2].to_ascii_lowercase().as_str() {
                "d" => 86_400,
                "h" => 3_600,
                "m" => 60,
                _ => 1,
            };
            value.checked_mul(unit)
        })
        .fold(0u64, u64::saturating_add);
    Duration::from_secs(seconds)
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let parts = [
        (total / 86_400, "d"),
        ((total % 86_400) / 3_600, "h"),
        ((total % 3_600) / 60, "m"),
        (total % 60, "s"),
    ];
    parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}
