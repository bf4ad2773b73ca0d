use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ad::Store;
use crate::config::UpdateCheckSection;
use crate::timestamp;

pub const CURRENT_STATE_VERSION: u32 = 1;
pub const MAX_INTERVAL_DAYS: f64 = 28.0;

/// Persisted bookkeeping for the periodic release check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheckState {
    pub version: u32,
    #[serde(with = "timestamp::option")]
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for UpdateCheckState {
    fn default() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            last_check: None,
        }
    }
}

impl UpdateCheckState {
    /// Reads a state document. Older versions are migrated and timestamps
    /// without an offset are taken as UTC. A bad timestamp only drops that field.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: Value = serde_json::from_str(content)?;
        let Value::Object(fields) = document else {
            return Ok(Self::default());
        };
        let version = fields
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0);
        if version < CURRENT_STATE_VERSION {
            info!(
                from = version,
                to = CURRENT_STATE_VERSION,
                "migrating update check state"
            );
        }
        let last_check = match fields.get("last_check") {
            Some(Value::String(raw)) => {
                let parsed = timestamp::parse_utc(raw);
                if parsed.is_none() {
                    warn!(value = %raw, "invalid timestamp in update check state");
                }
                parsed
            }
            _ => None,
        };
        Ok(Self {
            version: version.max(CURRENT_STATE_VERSION),
            last_check,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn record_check(&mut self, now: DateTime<Utc>) {
        self.last_check = Some(now);
    }

    /// Whether more than `interval` (`<number><unit>`, unit one of s/m/h/d/w)
    /// has passed since the last check. Invalid or out-of-range intervals
    /// always check.
    pub fn should_check(&self, interval: &str, now: DateTime<Utc>) -> bool {
        let Some((value, unit)) = parse_interval(interval) else {
            warn!(interval, "invalid update check interval, expected e.g. 7d");
            return true;
        };
        let days = value * seconds_per_unit(unit) / 86_400.0;
        if days > MAX_INTERVAL_DAYS {
            warn!(interval, "update check interval too long, maximum is 4w");
            return true;
        }
        if days < 1.0 && matches!(unit, 'd' | 'w') {
            warn!(interval, "update check interval too short, minimum is 1d");
            return true;
        }
        let Some(last_check) = self.last_check else {
            return true;
        };
        let interval_seconds = (value * seconds_per_unit(unit)) as i64;
        (now - last_check).num_seconds() > interval_seconds
    }
}

fn parse_interval(interval: &str) -> Option<(f64, char)> {
    let interval = interval.trim();
    let unit = interval.chars().last()?.to_ascii_lowercase();
    let value: f64 = interval[..interval.len() - unit.len_utf8()].trim().parse().ok()?;
    if !value.is_finite() || value <= 0.0 || !matches!(unit, 's' | 'm' | 'h' | 'd' | 'w') {
        return None;
    }
    Some((value, unit))
}

fn seconds_per_unit(unit: char) -> f64 {
    match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3_600.0,
        'd' => 86_400.0,
        'w' => 604_800.0,
        _ => 0.0,
    }
}

#[derive(Debug, Error)]
#[error("release probe failed: {0}")]
pub struct ProbeError(pub String);

/// Answers whether a newer release than the running one exists.
#[async_trait]
pub trait ReleaseProbe: Send + Sync {
    async fn update_available(&self) -> Result<bool, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateCheckOutcome {
    Disabled,
    NotDue { last_check: Option<DateTime<Utc>> },
    UpToDate,
    UpdateAvailable,
    Failed { message: String },
}

pub struct UpdateChecker {
    settings: UpdateCheckSection,
    store: Arc<dyn Store>,
}

impl UpdateChecker {
    pub fn new(settings: UpdateCheckSection, store: Arc<dyn Store>) -> Self {
        Self { settings, store }
    }

    pub fn settings(&self) -> &UpdateCheckSection {
        &self.settings
    }

    pub fn state(&self) -> UpdateCheckState {
        self.store.load_update_check_state()
    }

    /// Enabled and past the configured interval for `state`.
    pub fn is_due(&self, state: &UpdateCheckState, now: DateTime<Utc>) -> bool {
        self.settings.enabled && state.should_check(&self.settings.interval, now)
    }

    pub async fn check(
        &self,
        probe: &dyn ReleaseProbe,
        now: DateTime<Utc>,
        force: bool,
    ) -> UpdateCheckOutcome {
        if !self.settings.enabled {
            return UpdateCheckOutcome::Disabled;
        }
        let mut state = self.state();
        if !force && !self.is_due(&state, now) {
            debug!(last_check = ?state.last_check, "update check not due");
            return UpdateCheckOutcome::NotDue {
                last_check: state.last_check,
            };
        }
        let available = match probe.update_available().await {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, "update check failed");
                return UpdateCheckOutcome::Failed {
                    message: err.to_string(),
                };
            }
        };
        state.record_check(now);
        if let Err(err) = self.store.save_update_check_state(&state) {
            warn!(error = %err, "failed to save update check state");
        }
        if available {
            info!("a newer release is available");
            UpdateCheckOutcome::UpdateAvailable
        } else {
            UpdateCheckOutcome::UpToDate
        }
    }
}
