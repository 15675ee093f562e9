//! Configuration types and loading for the application.

use std::path::Path;

use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::paths::{expand_str_path, write_default_config};
use crate::portal::TeamOverrides;
use crate::{AppPaths, env_prefix};

/// Default portal API base URL.
pub const DEFAULT_BASE_URL: &str = "https://developer.apple.com/services-account/QH65B2/";
/// Default login form endpoint.
pub const DEFAULT_LOGIN_URL: &str = "https://idmsa.apple.com/IDMSWebAuth/authenticate";
/// Default landing page used for CSRF token discovery.
pub const DEFAULT_LANDING_PATH: &str = "https://developer.apple.com/account/overview.action";
/// Default team listing endpoint, relative to the base URL.
pub const DEFAULT_TEAMS_PATH: &str = "account/listTeams.action";
/// Default page whose login link carries the application key.
pub const DEFAULT_API_KEY_URL: &str = "https://developer.apple.com/membercenter/index.action";
/// Name of the session cookie set at login.
pub const DEFAULT_COOKIE_NAME: &str = "myacinfo";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(
    title = "Application Configuration",
    description = "Configuration for the developer portal client"
)]
pub struct AppConfig {
    /// JSON Schema reference for editor support.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub schema: Option<String>,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// HTTP transport and paging behavior.
    pub http: HttpConfig,

    /// Portal endpoints.
    pub portal: PortalConfig,

    /// Team selection overrides.
    pub team: TeamOverrides,
}

impl AppConfig {
    /// Load configuration from file and environment, creating defaults if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read, parsed, or written.
    pub fn load(paths: &AppPaths, dry_run: bool) -> Result<Self> {
        if !paths.config_file.exists() {
            if dry_run {
                log::info!(
                    "dry-run: would create default config at {}",
                    paths.config_file.display()
                );
            } else {
                write_default_config(&paths.config_file)?;
            }
        }

        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// Environment variables override file values. The prefix is followed by
    /// one `_`, sections and keys are separated by `__`
    /// (for example `DEVPORTAL_HTTP__TIMEOUT_SECS`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn load_from_path(config_file: &Path) -> Result<Self> {
        Self::load_layered(config_file, environment())
    }

    fn load_layered(config_file: &Path, environment: Environment) -> Result<Self> {
        let built = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("http.timeout_secs", 60_i64)?
            .set_default("http.max_retries", 5_i64)?
            .set_default("http.page_size", 500_i64)?
            .set_default("portal.base_url", DEFAULT_BASE_URL)?
            .set_default("portal.login_url", DEFAULT_LOGIN_URL)?
            .set_default("portal.landing_path", DEFAULT_LANDING_PATH)?
            .set_default("portal.teams_path", DEFAULT_TEAMS_PATH)?
            .set_default("portal.cookie_name", DEFAULT_COOKIE_NAME)?
            .set_default("portal.login_path_marker", "/login")?
            .set_default("portal.api_key_url", DEFAULT_API_KEY_URL)?
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()?;

        let mut config: Self = built.try_deserialize()?;

        if let Some(ref file) = config.logging.file {
            let expanded = expand_str_path(file)?;
            config.logging.file = Some(expanded.display().to_string());
        }

        Ok(config)
    }
}

/// `DEVPORTAL_<SECTION>__<KEY>` environment source.
fn environment() -> Environment {
    Environment::with_prefix(env_prefix().as_str())
        .prefix_separator("_")
        .separator("__")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: None,
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
            portal: PortalConfig::default(),
            team: TeamOverrides::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Logging configuration")]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace).
    #[schemars(default = "default_log_level")]
    pub level: LogLevel,

    /// Optional path for log file output. Supports ~ and environment variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Log level enumeration for schema validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only emit error-level messages.
    Error,
    /// Emit warnings and errors.
    Warn,
    /// Emit informational messages and above (default).
    #[default]
    Info,
    /// Emit debug diagnostics and above.
    Debug,
    /// Emit all messages including fine-grained traces.
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

const fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "HTTP transport and paging configuration")]
pub struct HttpConfig {
    /// Per-attempt request timeout in seconds (default: 60).
    #[schemars(range(min = 1))]
    pub timeout_secs: u64,

    /// Retries after a timed-out attempt. Values below 5 are raised to 5.
    pub max_retries: u32,

    /// Pause before each retry in seconds. Defaults to the timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,

    /// Records requested per page on list calls (default: 500).
    #[schemars(range(min = 1))]
    pub page_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 5,
            retry_delay_secs: None,
            page_size: 500,
        }
    }
}

/// Portal endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
#[schemars(description = "Developer portal endpoints")]
pub struct PortalConfig {
    /// Base URL that relative resource paths are joined onto.
    pub base_url: String,

    /// Login form endpoint.
    pub login_url: String,

    /// Page fetched to discover CSRF tokens.
    pub landing_path: String,

    /// Team listing endpoint.
    pub teams_path: String,

    /// Name of the session cookie set at login.
    pub cookie_name: String,

    /// Redirect-target fragment that means the session has expired.
    pub login_path_marker: String,

    /// Page scraped for the application key sent with the login form.
    pub api_key_url: String,

    /// Fixed application key. Skips discovery from `api_key_url` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id_key: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            teams_path: DEFAULT_TEAMS_PATH.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            login_path_marker: "/login".to_string(),
            api_key_url: DEFAULT_API_KEY_URL.to_string(),
            app_id_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("devportal-config-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        let path = dir.join(name);
        fs::write(&path, contents).expect("write scratch file");
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("devportal-definitely-missing.toml");
        let config = AppConfig::load_from_path(&path).expect("load");

        assert_eq!(config.http.timeout_secs, 60);
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.http.page_size, 500);
        assert!(config.http.retry_delay_secs.is_none());
        assert_eq!(config.portal, PortalConfig::default());
        assert!(config.team.id.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let path = scratch_file(
            "overrides.toml",
            r#"
[http]
timeout_secs = 5
page_size = 8

[portal]
cookie_name = "othercookie"

[team]
name = "SpaceShip"
"#,
        );

        let config = AppConfig::load_from_path(&path).expect("load");
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.page_size, 8);
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.portal.cookie_name, "othercookie");
        assert_eq!(config.portal.teams_path, DEFAULT_TEAMS_PATH);
        assert_eq!(config.team.name.as_deref(), Some("SpaceShip"));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).expect("serialize");
        assert!(text.contains("[portal]"));
        assert!(!text.contains("app_id_key"));

        let path = scratch_file("roundtrip.toml", &text);
        let config = AppConfig::load_from_path(&path).expect("load");
        assert_eq!(config.portal, PortalConfig::default());
    }

    #[test]
    fn prefixed_environment_overrides_file_and_defaults() {
        let path = scratch_file(
            "env.toml",
            r#"
[http]
timeout_secs = 5
"#,
        );
        let mut vars = config::Map::new();
        vars.insert("DEVPORTAL_HTTP__PAGE_SIZE".to_string(), "8".to_string());
        vars.insert("DEVPORTAL_HTTP__TIMEOUT_SECS".to_string(), "7".to_string());
        vars.insert("DEVPORTAL_TEAM__ID".to_string(), "YYYYYYYYYY".to_string());
        vars.insert("DEVPORTAL_PORTAL__APP_ID_KEY".to_string(), "0123abcdef".to_string());
        vars.insert("OTHER_HTTP__PAGE_SIZE".to_string(), "3".to_string());

        let config = AppConfig::load_layered(&path, environment().source(Some(vars)))
            .expect("load");
        assert_eq!(config.http.page_size, 8);
        assert_eq!(config.http.timeout_secs, 7);
        assert_eq!(config.team.id.as_deref(), Some("YYYYYYYYYY"));
        assert_eq!(config.portal.app_id_key.as_deref(), Some("0123abcdef"));
    }

    #[test]
    fn double_underscore_after_prefix_is_not_recognised() {
        let path = std::env::temp_dir().join("devportal-definitely-missing.toml");
        let mut vars = config::Map::new();
        vars.insert("DEVPORTAL__HTTP__PAGE_SIZE".to_string(), "8".to_string());

        let config = AppConfig::load_layered(&path, environment().source(Some(vars)))
            .expect("load");
        assert_eq!(config.http.page_size, 500);
    }
}
