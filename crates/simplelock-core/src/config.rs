//! Lock configuration
//!
//! Every tunable of the lock engine lives here and is passed explicitly to
//! the component that needs it. Values can be overridden from an optional
//! `config.toml` next to the credential file.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::grab::CursorColor;
use crate::APP_NAME;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Credential file name
const PASSWD_FILE_NAME: &str = "passwd";

/// Default delay imposed by every failed attempt
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default share of the goodwill spent per failed attempt
pub const DEFAULT_GOODWILL_PORTION: f64 = 0.3;

/// Default password length limit (protects against memory exhaustion)
pub const DEFAULT_MAX_PASSWORD_LEN: usize = 100 * 1024;

/// Top-level lock configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// Adaptive lockout timer settings
    pub lockout: LockoutConfig,
    /// Password buffer settings
    pub buffer: BufferConfig,
    /// Input grab settings
    pub grab: GrabPolicy,
    /// Invisible cursor colours
    pub cursor: CursorConfig,
    /// Keymap used to translate key presses
    pub keyboard: KeyboardConfig,
}

/// Adaptive lockout timer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockoutConfig {
    /// Fixed delay added after every failed attempt
    #[serde(rename = "base_timeout_ms", with = "millis")]
    pub base_timeout: Duration,
    /// Upper bound of the goodwill budget
    #[serde(rename = "max_goodwill_ms", with = "millis")]
    pub max_goodwill: Duration,
    /// Fraction of the remaining goodwill spent per failure
    pub goodwill_portion: f64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            base_timeout: DEFAULT_BASE_TIMEOUT,
            max_goodwill: DEFAULT_BASE_TIMEOUT * 5,
            goodwill_portion: DEFAULT_GOODWILL_PORTION,
        }
    }
}

/// Password buffer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of buffered password bytes
    pub max_len: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_MAX_PASSWORD_LEN,
        }
    }
}

/// Input grab settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GrabPolicy {
    /// Pointer grab attempts before giving up
    pub pointer_attempts: u32,
    /// Pause between pointer grab attempts
    #[serde(rename = "pointer_retry_delay_ms", with = "millis")]
    pub pointer_retry_delay: Duration,
}

impl Default for GrabPolicy {
    fn default() -> Self {
        // Window managers may hold the keyboard for a moment after a hotkey
        // launch: 100 attempts, 10 ms apart, about one second in total.
        Self {
            pointer_attempts: 100,
            pointer_retry_delay: Duration::from_millis(10),
        }
    }
}

/// Colours of the invisible cursor
///
/// The cursor bitmaps are empty so the colours never show, but the server
/// still needs two allocated colours to build it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CursorConfig {
    /// Foreground colour
    pub fg: CursorColor,
    /// Background colour
    pub bg: CursorColor,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            fg: CursorColor::Named("grey25".to_string()),
            bg: CursorColor::Named("steelblue3".to_string()),
        }
    }
}

/// XKB keymap names
///
/// Empty fields are taken from the names the X server publishes, and
/// whatever is still empty after that from the XKB_DEFAULT_* environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyboardConfig {
    pub rules: String,
    pub model: String,
    pub layout: String,
    pub variant: String,
    pub options: Option<String>,
}

impl KeyboardConfig {
    /// Fill unset fields from `fallback`
    ///
    /// A variant only makes sense for its own layout, so the fallback
    /// variant is used only together with the fallback layout.
    pub fn with_fallback(mut self, fallback: KeyboardConfig) -> Self {
        if self.rules.is_empty() {
            self.rules = fallback.rules;
        }
        if self.model.is_empty() {
            self.model = fallback.model;
        }
        if self.layout.is_empty() {
            self.layout = fallback.layout;
            if self.variant.is_empty() {
                self.variant = fallback.variant;
            }
        }
        if self.options.is_none() {
            self.options = fallback.options;
        }
        self
    }
}

impl LockConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        Self::config_dir_from(std::env::var_os("XDG_CONFIG_HOME"))
    }

    /// Resolve the configuration directory from an `XDG_CONFIG_HOME` value
    pub fn config_dir_from(xdg_config_home: Option<OsString>) -> Option<PathBuf> {
        if let Some(xdg_config) = xdg_config_home.filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(xdg_config).join(APP_NAME));
        }

        // Fall back to ~/.config
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .map(|p| p.join(APP_NAME))
    }

    /// Get the full config file path
    pub fn config_file_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the credential file path
    pub fn credential_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join(PASSWD_FILE_NAME))
    }

    /// Load configuration from the default location
    ///
    /// Returns the default configuration if the file doesn't exist or can't
    /// be parsed.
    pub fn load() -> Self {
        match Self::config_file_path() {
            Some(path) => Self::load_or_default(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults with a warning
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        Self::load_from(path).unwrap_or_else(|e| {
            tracing::warn!("Ignoring config file {:?}: {}", path, e);
            Self::default()
        })
    }

    /// Load and validate configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let portion = self.lockout.goodwill_portion;
        if !(0.0..=1.0).contains(&portion) {
            return Err(ConfigError::Invalid(format!(
                "goodwill_portion must be within 0.0..=1.0, got {}",
                portion
            )));
        }

        if self.grab.pointer_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pointer_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = u64::try_from(duration.as_millis()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
