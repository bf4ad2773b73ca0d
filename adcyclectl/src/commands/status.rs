use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use adcycle_core::browser::{summarize, TimingSummary};
use adcycle_core::update_check::UpdateChecker;

use crate::{AppContext, DisplayFallback, Result};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config: String,
    pub ads_dir: String,
    pub ads: usize,
    pub active_ads: usize,
    pub unreadable_ads: usize,
    pub update_check: UpdateCheckStatus,
    pub captcha_auto_restart: bool,
    pub captcha_restart_delay: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timings: Vec<TimingSummary>,
}

#[derive(Debug, Serialize)]
pub struct UpdateCheckStatus {
    pub enabled: bool,
    pub interval: String,
    pub last_check: Option<DateTime<Utc>>,
    pub due: bool,
}

pub fn execute(context: &AppContext) -> Result<StatusReport> {
    let config = context.config();
    let inventory = context.load_ads()?;
    let checker = UpdateChecker::new(
        config.update_check.clone(),
        Arc::new(context.store().clone()),
    );
    let state = checker.state();
    let timings = if config.telemetry.enabled {
        read_timings(&config.resolve_path(&config.telemetry.timing_db))?
    } else {
        Vec::new()
    };

    Ok(StatusReport {
        config: context.config_path.display().to_string(),
        ads_dir: context.store().ads_dir().display().to_string(),
        ads: inventory.entries.len(),
        active_ads: inventory
            .entries
            .iter()
            .filter(|entry| entry.record.is_active(&config.ad_defaults))
            .count(),
        unreadable_ads: inventory.issues.len(),
        update_check: UpdateCheckStatus {
            enabled: config.update_check.enabled,
            interval: config.update_check.interval.clone(),
            last_check: state.last_check,
            due: checker.is_due(&state, Utc::now()),
        },
        captcha_auto_restart: config.captcha.auto_restart,
        captcha_restart_delay: config.captcha.restart_delay.clone(),
        timings,
    })
}

/// Per-key aggregates from the timing database, opened read-only. A missing
/// database simply means nothing was recorded yet.
fn read_timings(path: &Path) -> Result<Vec<TimingSummary>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    Ok(summarize(&conn)?)
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Config: {}", self.config),
            format!(
                "Ads: {} in {} ({} active, {} unreadable)",
                self.ads, self.ads_dir, self.active_ads, self.unreadable_ads
            ),
        ];
        let last_check = self
            .update_check
            .last_check
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        if self.update_check.enabled {
            lines.push(format!(
                "Update check: every {}, last {last_check}{}",
                self.update_check.interval,
                if self.update_check.due { " (due)" } else { "" }
            ));
        } else {
            lines.push("Update check: disabled".to_string());
        }
        lines.push(if self.captcha_auto_restart {
            format!("Captcha: restart after {}", self.captcha_restart_delay)
        } else {
            "Captcha: manual pause".to_string()
        });
        if self.timings.is_empty() {
            lines.push("Timings: none recorded".to_string());
        } else {
            lines.push("Timings:".to_string());
            for timing in &self.timings {
                lines.push(format!(
                    "  - {}: {} attempts, {} failed, mean {:.2}s, max {:.2}s",
                    timing.operation_key,
                    timing.attempts,
                    timing.failures,
                    timing.mean_duration_sec,
                    timing.max_duration_sec
                ));
            }
        }
        lines.join("\n")
    }
}
