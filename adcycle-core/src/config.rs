use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ad::AdDefaults;
use crate::duration::parse_duration;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AppConfig {
    pub ads_dir: PathBuf,
    pub ad_defaults: AdDefaults,
    pub timeouts: TimeoutSection,
    pub captcha: CaptchaSection,
    pub update_check: UpdateCheckSection,
    pub site: SiteSection,
    pub login: LoginSection,
    pub browser: BrowserSection,
    pub telemetry: TelemetrySection,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ads_dir: PathBuf::from("."),
            ad_defaults: AdDefaults::default(),
            timeouts: TimeoutSection::default(),
            captcha: CaptchaSection::default(),
            update_check: UpdateCheckSection::default(),
            site: SiteSection::default(),
            login: LoginSection::default(),
            browser: BrowserSection::default(),
            telemetry: TelemetrySection::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /// Directory relative paths in this document are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn ads_root(&self) -> PathBuf {
        self.resolve_path(&self.ads_dir)
    }

    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate()?;
        self.captcha.validate()?;
        if self.ad_defaults.republication_interval == 0 {
            return Err(ConfigError::invalid(
                "ad_defaults.republication_interval",
                "must be at least one day",
            ));
        }
        if self.site.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("site.base_url", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub profile: String,
    pub multiplier: f64,
    pub overrides: BTreeMap<String, f64>,
    pub retry: RetryOverrides,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            profile: "normal".to_string(),
            multiplier: 1.0,
            overrides: BTreeMap::new(),
            retry: RetryOverrides::default(),
        }
    }
}

impl TimeoutSection {
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                "timeouts.multiplier",
                format!("must be greater than zero, got {}", self.multiplier),
            ));
        }
        for (key, value) in &self.overrides {
            if !value.is_finite() || *value < 0.0 {
                return Err(ConfigError::invalid(
                    format!("timeouts.overrides.{key}"),
                    format!("must be a non-negative number of seconds, got {value}"),
                ));
            }
        }
        self.retry.validate()
    }
}

/// Optional adjustments applied on top of the selected profile's retry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub backoff_factor: Option<f64>,
    pub max_backoff_factor: Option<f64>,
}

impl RetryOverrides {
    fn validate(&self) -> Result<()> {
        if let Some(factor) = self.backoff_factor {
            if !factor.is_finite() || factor < 1.0 {
                return Err(ConfigError::invalid(
                    "timeouts.retry.backoff_factor",
                    format!("must be at least 1.0, got {factor}"),
                ));
            }
        }
        if let Some(ceiling) = self.max_backoff_factor {
            if !ceiling.is_finite() || ceiling < 1.0 {
                return Err(ConfigError::invalid(
                    "timeouts.retry.max_backoff_factor",
                    format!("must be at least 1.0, got {ceiling}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaSection {
    pub auto_restart: bool,
    pub restart_delay: String,
}

impl Default for CaptchaSection {
    fn default() -> Self {
        Self {
            auto_restart: false,
            restart_delay: "6h".to_string(),
        }
    }
}

impl CaptchaSection {
    pub fn restart_delay(&self) -> Duration {
        parse_duration(&self.restart_delay)
    }

    fn validate(&self) -> Result<()> {
        if self.auto_restart && self.restart_delay().is_zero() {
            return Err(ConfigError::invalid(
                "captcha.restart_delay",
                format!(
                    "expected a duration like \"6h\" or \"1h 30m\", got \"{}\"",
                    self.restart_delay
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCheckSection {
    pub enabled: bool,
    pub interval: String,
}

impl Default for UpdateCheckSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: "7d".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    pub base_url: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            base_url: "https://www.kleinanzeigen.de".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSection {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub arguments: Vec<String>,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: true,
            arguments: Vec::new(),
            user_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub enabled: bool,
    pub timing_log: PathBuf,
    pub timing_db: PathBuf,
    pub retention_days: u32,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            timing_log: PathBuf::from(".temp/timing/timing_data.jsonl"),
            timing_db: PathBuf::from(".temp/timing/timing.sqlite"),
            retention_days: 30,
        }
    }
}

pub fn load_app_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    let config: AppConfig = load_document(path)?;
    let base_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = config.with_base_dir(base_dir);
    config.validate()?;
    Ok(config)
}

fn load_document<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                source,
                path: path.to_path_buf(),
            })
        }
        Some("json") => serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            source,
            path: path.to_path_buf(),
        }),
        Some("toml") => toml::from_str(&content).map_err(|source| ConfigError::Toml {
            source,
            path: path.to_path_buf(),
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}
