use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::models::{AdEntry, AdRecord};
use crate::config::AppConfig;
use crate::update_check::UpdateCheckState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        source: serde_yaml::Error,
        path: PathBuf,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("unsupported ad file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("failed to scan ad directory {path}: {source}")]
    Walk {
        source: walkdir::Error,
        path: PathBuf,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence for ad records and the update-check state.
pub trait Store: Send + Sync {
    fn persist_ad(&self, entry: &AdEntry) -> StoreResult<()>;

    /// Never fails: unreadable state is logged and replaced by a pristine value.
    fn load_update_check_state(&self) -> UpdateCheckState;

    fn save_update_check_state(&self, state: &UpdateCheckState) -> StoreResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Ads found on disk plus the files that could not be read. Broken files are
/// left untouched so their publication history survives until fixed by hand.
#[derive(Debug, Default)]
pub struct AdInventory {
    pub entries: Vec<AdEntry>,
    pub issues: Vec<LoadIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    fn of(path: &Path) -> StoreResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml") | Some("yml") => Ok(DocumentFormat::Yaml),
            Some("json") => Ok(DocumentFormat::Json),
            _ => Err(StoreError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    ads_dir: PathBuf,
    state_file: PathBuf,
}

impl FileStore {
    pub fn new(ads_dir: impl Into<PathBuf>, state_file: impl Into<PathBuf>) -> Self {
        Self {
            ads_dir: ads_dir.into(),
            state_file: state_file.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.ads_root(),
            config.resolve_path(".temp/update_check_state.json"),
        )
    }

    pub fn ads_dir(&self) -> &Path {
        &self.ads_dir
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn load_ads(&self) -> StoreResult<AdInventory> {
        let mut inventory = AdInventory::default();
        let walker = WalkDir::new(&self.ads_dir)
            .follow_links(true)
            .sort_by_file_name();
        for item in walker {
            let item = item.map_err(|source| StoreError::Walk {
                source,
                path: self.ads_dir.clone(),
            })?;
            if !item.file_type().is_file() || !is_ad_file(item.path()) {
                continue;
            }
            let path = item.into_path();
            match read_ad(&path) {
                Ok(record) => inventory.entries.push(AdEntry::new(path, record)),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable ad file");
                    inventory.issues.push(LoadIssue {
                        path,
                        message: err.to_string(),
                    });
                }
            }
        }
        info!(
            dir = %self.ads_dir.display(),
            ads = inventory.entries.len(),
            issues = inventory.issues.len(),
            "loaded ad files"
        );
        Ok(inventory)
    }
}

impl Store for FileStore {
    fn persist_ad(&self, entry: &AdEntry) -> StoreResult<()> {
        write_ad(&entry.path, &entry.record)?;
        debug!(path = %entry.path.display(), "persisted ad");
        Ok(())
    }

    fn load_update_check_state(&self) -> UpdateCheckState {
        let content = match fs::read_to_string(&self.state_file) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return UpdateCheckState::default();
            }
            Err(err) => {
                warn!(path = %self.state_file.display(), error = %err, "cannot read update check state");
                return UpdateCheckState::default();
            }
        };
        UpdateCheckState::from_json(&content).unwrap_or_else(|err| {
            warn!(path = %self.state_file.display(), error = %err, "discarding corrupt update check state");
            UpdateCheckState::default()
        })
    }

    fn save_update_check_state(&self, state: &UpdateCheckState) -> StoreResult<()> {
        let content = state.to_json().map_err(|source| StoreError::Json {
            source,
            path: self.state_file.clone(),
        })?;
        write_atomic(&self.state_file, content.as_bytes())
    }
}

/// `ad_*.yaml`, `ad_*.yml` or `ad_*.json`.
pub fn is_ad_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.starts_with("ad_") && DocumentFormat::of(path).is_ok()
}

pub fn read_ad(path: &Path) -> StoreResult<AdRecord> {
    let format = DocumentFormat::of(path)?;
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    match format {
        DocumentFormat::Yaml => serde_yaml::from_str(&content).map_err(|source| StoreError::Yaml {
            source,
            path: path.to_path_buf(),
        }),
        DocumentFormat::Json => serde_json::from_str(&content).map_err(|source| StoreError::Json {
            source,
            path: path.to_path_buf(),
        }),
    }
}

pub fn write_ad(path: &Path, record: &AdRecord) -> StoreResult<()> {
    let content = match DocumentFormat::of(path)? {
        DocumentFormat::Yaml => serde_yaml::to_string(record).map_err(|source| StoreError::Yaml {
            source,
            path: path.to_path_buf(),
        })?,
        DocumentFormat::Json => {
            serde_json::to_string_pretty(record).map_err(|source| StoreError::Json {
                source,
                path: path.to_path_buf(),
            })?
        }
    };
    write_atomic(path, content.as_bytes())
}

fn write_atomic(path: &Path, content: &[u8]) -> StoreResult<()> {
    let io_error = |source| StoreError::Io {
        source,
        path: path.to_path_buf(),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(io_error)?;
    let mut file = tempfile::NamedTempFile::new_in(&parent).map_err(io_error)?;
    file.write_all(content).map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|err| io_error(err.error))?;
    Ok(())
}
