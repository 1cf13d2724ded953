//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (`--config <path>`)
//! 2. `~/.tuile/config.toml` (user)
//! 3. `/etc/tuile/config.toml` (system)
//!
//! Every key is optional; missing keys keep the in-code defaults.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.tuile/secrets.toml` (user, must be 0600)
//! 2. `/etc/tuile/secrets.toml` (system, must be 0600)
//!
//! with `TUILE_API_KEY` / `TUILE_ACCESS_TOKEN` as fallbacks.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, RetentionClass, RetentionPolicy};
use crate::realtime::RealtimeConfig;
use crate::retry::RetryConfig;
use crate::types::Table;
use crate::{Result, SyncError};

/// Environment variable holding the backend's anonymous API key.
pub const API_KEY_ENV: &str = "TUILE_API_KEY";
/// Environment variable holding the signed-in user's access token.
pub const ACCESS_TOKEN_ENV: &str = "TUILE_ACCESS_TOKEN";

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TuileConfig {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub gc: GcSection,
}

/// Backend location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSection {
    /// Project URL, e.g. `https://xyz.example.co`.
    #[serde(default)]
    pub url: Option<String>,
    /// Signed-in user, for the role lookup.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Overrides of one retention class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetentionSection {
    #[serde(default)]
    pub stale_secs: Option<u64>,
    #[serde(default)]
    pub gc_secs: Option<u64>,
}

impl RetentionSection {
    fn apply(&self, defaults: RetentionPolicy) -> RetentionPolicy {
        RetentionPolicy::new(
            self.stale_secs
                .map_or(defaults.stale_time, Duration::from_secs),
            self.gc_secs.map_or(defaults.gc_time, Duration::from_secs),
        )
    }
}

/// `[cache.standard]`, `[cache.static]`, `[cache.live]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub standard: RetentionSection,
    #[serde(default, rename = "static")]
    pub static_data: RetentionSection,
    #[serde(default)]
    pub live: RetentionSection,
}

/// Read retries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

impl RetrySection {
    fn apply(&self, defaults: RetryConfig) -> RetryConfig {
        let mut config = defaults;
        if let Some(n) = self.max_attempts {
            config = config.max_attempts(n);
        }
        if let Some(ms) = self.initial_delay_ms {
            config = config.initial_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_delay_ms {
            config = config.max_delay(Duration::from_millis(ms));
        }
        config
    }
}

/// Realtime channels.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSection {
    /// Open channels at startup (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tables to open channels for (default: chantiers).
    #[serde(default = "default_realtime_tables")]
    pub tables: Vec<Table>,
    /// Reconnection backoff.
    #[serde(default)]
    pub reconnect: RetrySection,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tables: default_realtime_tables(),
            reconnect: RetrySection::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_realtime_tables() -> Vec<Table> {
    vec![Table::Chantiers]
}

/// Background eviction.
#[derive(Debug, Clone, Deserialize)]
pub struct GcSection {
    /// Seconds between eviction sweeps (default: 60).
    #[serde(default = "default_gc_interval")]
    pub interval_secs: u64,
}

impl Default for GcSection {
    fn default() -> Self {
        Self {
            interval_secs: default_gc_interval(),
        }
    }
}

fn default_gc_interval() -> u64 {
    60
}

impl TuileConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.tuile/config.toml`
    /// 3. `/etc/tuile/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but an absent file (when no explicit
    /// path is given) yields the defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => Self::load(Some(path)),
            None => match Self::find_config_path() {
                Some(path) => Self::load_from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SyncError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(SyncError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }
        Self::find_config_path().ok_or_else(|| {
            SyncError::Configuration(
                "No config file found. Create ~/.tuile/config.toml or /etc/tuile/config.toml"
                    .to_string(),
            )
        })
    }

    fn find_config_path() -> Option<PathBuf> {
        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tuile").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/tuile/config.toml");
        system_config.exists().then_some(system_config)
    }

    /// Retention windows with this file's overrides applied.
    pub fn cache_config(&self) -> CacheConfig {
        let defaults = CacheConfig::default();
        defaults
            .clone()
            .policy_for(
                RetentionClass::Standard,
                self.cache.standard.apply(defaults.standard),
            )
            .policy_for(
                RetentionClass::Static,
                self.cache.static_data.apply(defaults.static_data),
            )
            .policy_for(RetentionClass::Live, self.cache.live.apply(defaults.live))
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.apply(RetryConfig::default())
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig::new().reconnect(
            self.realtime
                .reconnect
                .apply(RealtimeConfig::default().reconnect),
        )
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc.interval_secs.max(1))
    }
}

/// Backend credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.tuile/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/tuile/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (env vars may still apply).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".tuile").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/tuile/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a secrets file after checking its permissions.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            SyncError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            SyncError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(SyncError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// API key from the file, falling back to `TUILE_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }

    /// Access token from the file, falling back to `TUILE_ACCESS_TOKEN`.
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_in_code_defaults() {
        let config = TuileConfig::default();
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.realtime_config(), RealtimeConfig::default());
        assert_eq!(config.gc_interval(), Duration::from_secs(60));
        assert!(config.realtime.enabled);
        assert_eq!(config.realtime.tables, vec![Table::Chantiers]);
    }

    #[test]
    fn partial_retention_override_keeps_other_field() {
        let toml = r#"
            [cache.static]
            stale_secs = 60
        "#;
        let config: TuileConfig = toml::from_str(toml).unwrap();
        let cache = config.cache_config();
        assert_eq!(cache.static_data.stale_time, Duration::from_secs(60));
        assert_eq!(cache.static_data.gc_time, Duration::from_secs(60 * 60));
        assert_eq!(cache.live, CacheConfig::default().live);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [backend]
            url = "https://demo.example.co"
            user_id = "u-1"

            [cache.live]
            stale_secs = 5
            gc_secs = 120

            [retry]
            max_attempts = 5
            initial_delay_ms = 200

            [realtime]
            enabled = false
            tables = ["chantiers", "devis"]

            [realtime.reconnect]
            max_attempts = 3

            [gc]
            interval_secs = 15
        "#;
        let config: TuileConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend.url.as_deref(), Some("https://demo.example.co"));
        assert_eq!(config.cache_config().live.gc_time, Duration::from_secs(120));
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert!(!config.realtime.enabled);
        assert_eq!(config.realtime.tables, vec![Table::Chantiers, Table::Devis]);
        assert_eq!(config.realtime_config().reconnect.max_attempts, 3);
        assert_eq!(config.gc_interval(), Duration::from_secs(15));
    }

    #[test]
    fn unknown_table_is_rejected() {
        let toml = r#"
            [realtime]
            tables = ["clients"]
        "#;
        assert!(toml::from_str::<TuileConfig>(toml).is_err());
    }

    #[test]
    fn parse_secrets() {
        let secrets: Secrets = toml::from_str(r#"api_key = "anon-key""#).unwrap();
        assert_eq!(secrets.api_key.as_deref(), Some("anon-key"));
        assert!(secrets.access_token.is_none());
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = TuileConfig::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }
}
