//! Application-level configuration loading, including the player color palette
//! and the preferences new profiles start from.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::preferences::GamePreferences;

/// Default location on disk where the host looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WORDMATCH_CONFIG_PATH";
/// Fallback color returned when the palette is exhausted.
const DEFAULT_COLOR: &str = "#9e9e9e";

const DEFAULT_STORE_PATH: &str = "data/match.json";
const STORE_PATH_ENV: &str = "MATCH_STORE_PATH";
const VALIDATOR_URL_ENV: &str = "WORD_VALIDATOR_URL";
const VALIDATOR_TIMEOUT_ENV: &str = "WORD_VALIDATOR_TIMEOUT_MS";
const DEFAULT_VALIDATOR_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    colors: Vec<String>,
    defaults: GamePreferences,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        colors = app_config.colors.len(),
                        "loaded palette and default preferences from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Preferences used when the store holds none yet.
    pub fn default_preferences(&self) -> &GamePreferences {
        &self.defaults
    }

    /// Return the first palette color that is not already listed in `used`.
    ///
    /// When every palette entry is already taken we fall back to [`DEFAULT_COLOR`] so
    /// callers always receive a value.
    pub fn first_unused_color(&self, used: &[String]) -> String {
        self.colors
            .iter()
            .find(|candidate| !used.contains(*candidate))
            .cloned()
            .unwrap_or_else(|| DEFAULT_COLOR.to_string())
    }

    /// Palette entry for slot `index`, or the first unused one when it is taken.
    pub fn color_for_slot(&self, index: usize, used: &[String]) -> String {
        if self.colors.is_empty() {
            return DEFAULT_COLOR.to_string();
        }
        let preferred = &self.colors[index % self.colors.len()];
        if used.contains(preferred) {
            self.first_unused_color(used)
        } else {
            preferred.clone()
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            colors: default_colors(),
            defaults: GamePreferences::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    colors: Vec<String>,
    #[serde(default)]
    preferences: GamePreferences,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut colors: Vec<String> = Vec::with_capacity(value.colors.len());
        for color in value.colors {
            let color = color.trim().to_lowercase();
            if !color.is_empty() && !colors.contains(&color) {
                colors.push(color);
            }
        }
        if colors.is_empty() {
            colors = default_colors();
        }

        Self {
            colors,
            defaults: value.preferences.clamped(),
        }
    }
}

/// Location of the JSON file backing [`crate::dao::file::JsonFileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Path of the profile document.
    pub path: PathBuf,
}

impl FileStoreConfig {
    /// Read `MATCH_STORE_PATH`, defaulting to `data/match.json`.
    pub fn from_env() -> Self {
        let path = env::var_os(STORE_PATH_ENV)
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
        Self { path }
    }
}

/// Connection settings for the remote word validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Base URL the `/validate` path is appended to.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ValidatorConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_VALIDATOR_TIMEOUT,
        }
    }

    /// Build a configuration from the environment; `None` when no URL is set.
    pub fn from_env() -> Option<Self> {
        let base_url = env::var(VALIDATOR_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())?;

        let timeout = match env::var(VALIDATOR_TIMEOUT_ENV) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(err) => {
                    warn!(value = %raw, error = %err, "invalid validator timeout; using default");
                    DEFAULT_VALIDATOR_TIMEOUT
                }
            },
            Err(_) => DEFAULT_VALIDATOR_TIMEOUT,
        };

        Some(Self { base_url, timeout })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in palette shipped with the binary.
fn default_colors() -> Vec<String> {
    [
        "#e53935", "#1e88e5", "#43a047", "#fdd835", "#8e24aa", "#fb8c00", "#00acc1", "#d81b60",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
