//! Configuration management for orbita
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend REST API
    #[serde(default)]
    pub api: ApiConfig,

    /// Realtime database service
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Session and login behaviour
    #[serde(default)]
    pub auth: AuthConfig,

    /// Page sizes for the view stores
    #[serde(default)]
    pub views: ViewLimits,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Backend API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend API
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

/// Realtime database service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Project URL; REST lives under /rest/v1, channels under /realtime/v1
    #[serde(default = "default_realtime_url")]
    pub url: String,

    /// Environment variable name for the service key
    #[serde(default = "default_realtime_key_env")]
    pub key_env: String,

    /// Seconds between heartbeats on the channel socket
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Seconds to wait for a join reply before giving up on a subscription
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,

    /// Open live subscriptions at all
    #[serde(default = "default_realtime_enabled")]
    pub enabled: bool,
}

/// Login behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Grant a demo session when the login call fails or the backend is absent
    #[serde(default = "default_demo_fallback")]
    pub demo_fallback: bool,

    /// Credential written for demo sessions
    #[serde(default = "default_demo_token")]
    pub demo_token: String,
}

/// Row limits applied by the view stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewLimits {
    #[serde(default = "default_leads_limit")]
    pub leads: usize,

    #[serde(default = "default_thread_limit")]
    pub thread: usize,

    #[serde(default = "default_conversation_leads_limit")]
    pub conversation_leads: usize,

    #[serde(default = "default_records_limit")]
    pub records: usize,

    #[serde(default = "default_campaigns_limit")]
    pub campaigns: usize,

    #[serde(default = "default_sessions_limit")]
    pub sessions: usize,

    #[serde(default = "default_activity_limit")]
    pub activity: usize,

    #[serde(default = "default_dashboard_activity_limit")]
    pub dashboard_activity: usize,

    #[serde(default = "default_notifications_limit")]
    pub notifications: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for orbita data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the local storage database
    pub db_file: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            key_env: default_realtime_key_env(),
            heartbeat_secs: default_heartbeat_secs(),
            join_timeout_secs: default_join_timeout_secs(),
            enabled: default_realtime_enabled(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            demo_fallback: default_demo_fallback(),
            demo_token: default_demo_token(),
        }
    }
}

impl Default for ViewLimits {
    fn default() -> Self {
        Self {
            leads: default_leads_limit(),
            thread: default_thread_limit(),
            conversation_leads: default_conversation_leads_limit(),
            records: default_records_limit(),
            campaigns: default_campaigns_limit(),
            sessions: default_sessions_limit(),
            activity: default_activity_limit(),
            dashboard_activity: default_dashboard_activity_limit(),
            notifications: default_notifications_limit(),
        }
    }
}

impl RealtimeConfig {
    /// Read the service key from the configured environment variable
    pub fn key(&self) -> Option<String> {
        std::env::var(&self.key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Config {
    /// Get the default base directory for orbita (~/.orbita)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".orbita")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("local.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("local.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if orbita is initialized (config and local storage exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.api.url)
            .map_err(|e| Error::Config(format!("api.url is not a valid URL: {}", e)))?;
        Url::parse(&self.realtime.url)
            .map_err(|e| Error::Config(format!("realtime.url is not a valid URL: {}", e)))?;

        if self.api.timeout_secs == 0 {
            return Err(Error::Config("api.timeout_secs must be positive".to_string()));
        }

        if self.realtime.heartbeat_secs == 0 || self.realtime.join_timeout_secs == 0 {
            return Err(Error::Config(
                "realtime.heartbeat_secs and realtime.join_timeout_secs must be positive"
                    .to_string(),
            ));
        }

        if self.auth.demo_fallback && self.auth.demo_token.trim().is_empty() {
            return Err(Error::Config(
                "auth.demo_token must be set when auth.demo_fallback is enabled".to_string(),
            ));
        }

        let limits = [
            ("views.leads", self.views.leads),
            ("views.thread", self.views.thread),
            ("views.conversation_leads", self.views.conversation_leads),
            ("views.records", self.views.records),
            ("views.campaigns", self.views.campaigns),
            ("views.sessions", self.views.sessions),
            ("views.activity", self.views.activity),
            ("views.dashboard_activity", self.views.dashboard_activity),
            ("views.notifications", self.views.notifications),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{} must be positive", name)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.realtime.key_env, "ORBITA_REALTIME_KEY");
        assert_eq!(config.views.conversation_leads, 30);
        assert!(config.auth.demo_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.api.url = "http://api.internal:9000".to_string();
        config.views.leads = 25;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.api.url, "http://api.internal:9000");
        assert_eq!(loaded.views.leads, 25);
        assert_eq!(loaded.paths.db_file, tmp.path().join("local.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[auth]\ndemo_fallback = false\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(!config.auth.demo_fallback);
        assert_eq!(config.realtime.heartbeat_secs, 25);
        assert_eq!(config.views.campaigns, 50);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.api.timeout_secs = 5;
        assert!(config.validate().is_ok());

        config.api.url = "not a url".to_string();
        assert!(config.validate().is_err());
        config.api.url = "http://localhost:8000".to_string();

        config.views.thread = 0;
        assert!(config.validate().is_err());
        config.views.thread = 10;

        config.auth.demo_token = "  ".to_string();
        assert!(config.validate().is_err());
        config.auth.demo_fallback = false;
        assert!(config.validate().is_ok());
    }
}
