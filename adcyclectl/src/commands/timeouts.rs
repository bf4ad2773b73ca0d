use serde::Serialize;

use adcycle_core::browser::{ResolvedPolicy, RetrySettings};

use crate::{AppContext, DisplayFallback};

#[derive(Debug, Serialize)]
pub struct TimeoutTable {
    pub profile: String,
    pub requested_profile: String,
    pub fallback: bool,
    pub multiplier: f64,
    pub retry: RetrySettings,
    pub rows: Vec<TimeoutRow>,
}

#[derive(Debug, Serialize)]
pub struct TimeoutRow {
    pub key: String,
    pub seconds: f64,
    pub overridden: bool,
}

pub fn execute(context: &AppContext) -> TimeoutTable {
    let policy = ResolvedPolicy::from_section(&context.config().timeouts);
    TimeoutTable {
        profile: policy.profile_name().to_string(),
        requested_profile: policy.requested_profile().to_string(),
        fallback: policy.is_fallback(),
        multiplier: policy.multiplier(),
        retry: policy.retry(),
        rows: policy
            .table()
            .into_iter()
            .map(|(key, resolution)| TimeoutRow {
                key: key.to_string(),
                seconds: resolution.timeout.as_secs_f64(),
                overridden: resolution.overridden,
            })
            .collect(),
    }
}

impl DisplayFallback for TimeoutTable {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        if self.fallback {
            lines.push(format!(
                "Profile '{}' unknown, using '{}'",
                self.requested_profile, self.profile
            ));
        }
        lines.push(format!(
            "Profile {} x{:.2} | retry={} attempts={} backoff={}..{}",
            self.profile,
            self.multiplier,
            self.retry.retry_enabled,
            self.retry.total_attempts(),
            self.retry.backoff_factor,
            self.retry.max_backoff_factor
        ));
        for row in &self.rows {
            let marker = if row.overridden { " (override)" } else { "" };
            lines.push(format!("  {:<24} {:>8.2}s{marker}", row.key, row.seconds));
        }
        lines.join("\n")
    }
}
