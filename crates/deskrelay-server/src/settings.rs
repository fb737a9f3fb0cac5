//! Broker settings exposed through `GET/POST /config`.
//!
//! Settings are a small JSON document next to the history data. The admin
//! name applies immediately; a new port only takes effect after a restart.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Settings errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The submitted settings are not acceptable.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Filesystem error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("Malformed settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Port the broker listens on after the next restart.
    pub port: u16,
    /// Name admins speak as.
    pub admin_name: String,
    /// Admin console theme, stored for the console and otherwise unused.
    pub theme: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 3000,
            admin_name: "IT".to_string(),
            theme: "light".to_string(),
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<(), SettingsError> {
        if self.port == 0 {
            return Err(SettingsError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.admin_name.trim().is_empty() {
            return Err(SettingsError::Invalid("adminName must not be empty".into()));
        }
        if self.theme.trim().is_empty() {
            return Err(SettingsError::Invalid("theme must not be empty".into()));
        }
        Ok(())
    }
}

/// A partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsPatch {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub admin_name: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
}

impl SettingsPatch {
    /// Parse a patch from an arbitrary JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if the body is not a settings object.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SettingsError> {
        serde_json::from_value(value).map_err(|e| SettingsError::Invalid(e.to_string()))
    }
}

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub settings: Settings,
    pub admin_name_changed: bool,
    pub restart_required: bool,
}

/// Settings backed by an optional JSON file.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Settings>,
    /// Port in effect for this process.
    running_port: u16,
}

impl SettingsStore {
    /// Create a store that never touches disk.
    #[must_use]
    pub fn in_memory(initial: Settings) -> Self {
        Self {
            path: None,
            running_port: initial.port,
            current: RwLock::new(initial),
        }
    }

    /// Load settings from `path`, or start from `defaults` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>, defaults: Settings) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(io_error(&path))?;
            let settings: Settings = serde_json::from_str(&raw)?;
            settings.validate()?;
            debug!(path = %path.display(), "Loaded settings");
            settings
        } else {
            defaults
        };

        Ok(Self {
            path: Some(path),
            running_port: settings.port,
            current: RwLock::new(settings),
        })
    }

    /// Current settings.
    #[must_use]
    pub fn get(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge, validate, persist, and apply a patch.
    ///
    /// Nothing changes unless the merged settings are valid and persisted.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for unacceptable values, or an I/O
    /// error if the settings file cannot be written.
    pub fn update(&self, patch: SettingsPatch) -> Result<SettingsUpdate, SettingsError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        let mut next = current.clone();
        if let Some(port) = patch.port {
            next.port = port;
        }
        if let Some(name) = patch.admin_name {
            next.admin_name = name.trim().to_string();
        }
        if let Some(theme) = patch.theme {
            next.theme = theme;
        }
        next.validate()?;

        if let Some(path) = &self.path {
            write_atomic(path, &serde_json::to_vec_pretty(&next)?)?;
        }

        let update = SettingsUpdate {
            admin_name_changed: next.admin_name != current.admin_name,
            restart_required: next.port != self.running_port,
            settings: next.clone(),
        };
        *current = next;

        info!(
            port = update.settings.port,
            admin_name = %update.settings.admin_name,
            restart_required = update.restart_required,
            "Settings updated"
        );
        Ok(update)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError {
    let path = path.to_path_buf();
    move |source| SettingsError::Io { path, source }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(io_error(&tmp))?;
    file.write_all(data).map_err(io_error(&tmp))?;
    file.sync_all().map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))
}
