//! Per-operation timeout budgets.
//!
//! A timeout is looked up by operation key. Each of the four built-in
//! profiles carries one base value per key plus retry parameters; the
//! configured multiplier scales base values and explicit overrides replace
//! them outright.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::config::TimeoutSection;

pub mod keys {
    pub const DEFAULT: &str = "default";
    pub const PAGE_LOAD: &str = "page_load";
    pub const QUICK_DOM: &str = "quick_dom";
    pub const CAPTCHA_DETECTION: &str = "captcha_detection";
    pub const LOGIN_DETECTION: &str = "login_detection";
    pub const FORM_INPUT: &str = "form_input";
    pub const PUBLISHING_RESULT: &str = "publishing_result";
    pub const PUBLISHING_CONFIRMATION: &str = "publishing_confirmation";

    pub const ALL: [&str; 8] = [
        DEFAULT,
        PAGE_LOAD,
        QUICK_DOM,
        CAPTCHA_DETECTION,
        LOGIN_DETECTION,
        FORM_INPUT,
        PUBLISHING_RESULT,
        PUBLISHING_CONFIRMATION,
    ];
}

pub const FALLBACK_PROFILE: &str = "normal";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrySettings {
    pub retry_enabled: bool,
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub max_backoff_factor: f64,
}

impl RetrySettings {
    /// Initial try plus `max_attempts` retries, or a single try when disabled.
    pub fn total_attempts(&self) -> u32 {
        if self.retry_enabled {
            self.max_attempts.saturating_add(1)
        } else {
            1
        }
    }
}

#[derive(Debug)]
pub struct TimeoutProfile {
    pub name: &'static str,
    /// Seconds, indexed like [`keys::ALL`].
    values: [f64; 8],
    pub retry: RetrySettings,
}

impl TimeoutProfile {
    pub fn base_seconds(&self, key: &str) -> Option<f64> {
        keys::ALL
            .iter()
            .position(|candidate| *candidate == key)
            .map(|index| self.values[index])
    }

    fn base_or_default(&self, key: &str) -> f64 {
        self.base_seconds(key).unwrap_or(self.values[0])
    }
}

static PROFILES: [TimeoutProfile; 4] = [
    TimeoutProfile {
        name: "normal",
        values: [5.0, 15.0, 2.0, 2.0, 10.0, 5.0, 300.0, 20.0],
        retry: RetrySettings {
            retry_enabled: true,
            max_attempts: 2,
            backoff_factor: 1.5,
            max_backoff_factor: 3.0,
        },
    },
    TimeoutProfile {
        name: "fast",
        values: [3.0, 8.0, 1.0, 1.0, 6.0, 3.0, 180.0, 10.0],
        retry: RetrySettings {
            retry_enabled: true,
            max_attempts: 1,
            backoff_factor: 1.5,
            max_backoff_factor: 2.0,
        },
    },
    TimeoutProfile {
        name: "slow",
        values: [10.0, 30.0, 4.0, 4.0, 20.0, 10.0, 600.0, 40.0],
        retry: RetrySettings {
            retry_enabled: true,
            max_attempts: 3,
            backoff_factor: 2.0,
            max_backoff_factor: 8.0,
        },
    },
    TimeoutProfile {
        name: "ci",
        values: [8.0, 25.0, 3.0, 3.0, 15.0, 8.0, 480.0, 30.0],
        retry: RetrySettings {
            retry_enabled: true,
            max_attempts: 4,
            backoff_factor: 2.0,
            max_backoff_factor: 8.0,
        },
    },
];

pub fn builtin_profile(name: &str) -> Option<&'static TimeoutProfile> {
    let name = name.trim();
    PROFILES
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name))
}

pub fn profile_names() -> impl Iterator<Item = &'static str> {
    PROFILES.iter().map(|profile| profile.name)
}

fn fallback_profile() -> &'static TimeoutProfile {
    &PROFILES[0]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutResolution {
    pub timeout: Duration,
    pub profile: &'static str,
    /// The requested profile was unknown and `normal` was used instead.
    pub fallback: bool,
    pub overridden: bool,
}

/// Effective timeout for `key`: the override if present, otherwise the
/// profile's base value times `multiplier`.
pub fn resolve(
    profile_name: &str,
    overrides: &BTreeMap<String, f64>,
    multiplier: f64,
    key: &str,
) -> TimeoutResolution {
    let (profile, fallback) = match builtin_profile(profile_name) {
        Some(profile) => (profile, false),
        None => (fallback_profile(), true),
    };
    resolve_in(profile, fallback, overrides, multiplier, key)
}

fn resolve_in(
    profile: &'static TimeoutProfile,
    fallback: bool,
    overrides: &BTreeMap<String, f64>,
    multiplier: f64,
    key: &str,
) -> TimeoutResolution {
    let (seconds, overridden) = match overrides.get(key) {
        Some(value) => (*value, true),
        None => (profile.base_or_default(key) * multiplier, false),
    };
    TimeoutResolution {
        timeout: seconds_to_duration(seconds),
        profile: profile.name,
        fallback,
        overridden,
    }
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

/// Immutable timeout and retry policy for one run.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    profile: &'static TimeoutProfile,
    requested: String,
    fallback: bool,
    multiplier: f64,
    overrides: BTreeMap<String, f64>,
    retry: RetrySettings,
}

impl ResolvedPolicy {
    pub fn new(profile_name: &str, multiplier: f64, overrides: BTreeMap<String, f64>) -> Self {
        let (profile, fallback) = match builtin_profile(profile_name) {
            Some(profile) => (profile, false),
            None => {
                warn!(
                    requested = profile_name,
                    fallback = FALLBACK_PROFILE,
                    known = ?profile_names().collect::<Vec<_>>(),
                    "unknown timeout profile"
                );
                (fallback_profile(), true)
            }
        };
        Self {
            profile,
            requested: profile_name.to_string(),
            fallback,
            multiplier,
            overrides,
            retry: profile.retry,
        }
    }

    pub fn from_section(section: &TimeoutSection) -> Self {
        let policy = Self::new(
            &section.profile,
            section.multiplier,
            section.overrides.clone(),
        );
        let base = policy.retry;
        let retry = RetrySettings {
            retry_enabled: section.retry.enabled.unwrap_or(base.retry_enabled),
            max_attempts: section.retry.max_attempts.unwrap_or(base.max_attempts),
            backoff_factor: section.retry.backoff_factor.unwrap_or(base.backoff_factor),
            max_backoff_factor: section
                .retry
                .max_backoff_factor
                .unwrap_or(base.max_backoff_factor),
        };
        policy.with_retry(retry)
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn profile_name(&self) -> &'static str {
        self.profile.name
    }

    pub fn requested_profile(&self) -> &str {
        &self.requested
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn retry(&self) -> RetrySettings {
        self.retry
    }

    pub fn resolution(&self, key: &str) -> TimeoutResolution {
        resolve_in(
            self.profile,
            self.fallback,
            &self.overrides,
            self.multiplier,
            key,
        )
    }

    pub fn timeout(&self, key: &str) -> Duration {
        self.resolution(key).timeout
    }

    /// Wait after the zero-based attempt `attempt` failed:
    /// `timeout(key) * min(backoff_factor^attempt, max_backoff_factor)`.
    pub fn backoff(&self, key: &str, attempt: u32) -> Duration {
        let base = self.timeout(key).as_secs_f64();
        let ceiling = if self.retry.max_backoff_factor.is_finite() {
            self.retry.max_backoff_factor.max(0.0)
        } else {
            1.0
        };
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let growth = self.retry.backoff_factor.powi(exponent);
        let factor = if growth.is_finite() {
            growth.clamp(0.0, ceiling)
        } else {
            ceiling
        };
        seconds_to_duration(base * factor)
    }

    pub fn table(&self) -> Vec<(&'static str, TimeoutResolution)> {
        let mut rows: Vec<(&'static str, TimeoutResolution)> = keys::ALL
            .iter()
            .map(|key| (*key, self.resolution(key)))
            .collect();
        for key in self.overrides.keys() {
            if !keys::ALL.contains(&key.as_str()) {
                warn!(key = %key, "timeout override for unknown operation key");
            }
        }
        rows.sort_by_key(|(key, _)| *key);
        rows
    }
}

impl Default for ResolvedPolicy {
    fn default() -> Self {
        Self::new(FALLBACK_PROFILE, 1.0, BTreeMap::new())
    }
}
