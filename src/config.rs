use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Connection settings for the external system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// API base URL (e.g., "https://www.zohoapis.com/books/v3")
    pub base_url: Option<String>,
    /// OAuth token endpoint host (e.g., "https://accounts.zoho.com")
    pub accounts_url: Option<String>,
    pub organization_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    /// Records requested per page
    pub page_size: u32,
    /// Retries per page on rate limits and transient failures
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            accounts_url: None,
            organization_id: None,
            access_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            page_size: 200,
            max_retries: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Returns true if the remote can be reached (URL, organization and token present)
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() && self.organization_id.is_some() && self.access_token.is_some()
    }

    /// Returns true if expired access tokens can be refreshed
    pub fn can_refresh(&self) -> bool {
        self.accounts_url.is_some()
            && self.refresh_token.is_some()
            && self.client_id.is_some()
            && self.client_secret.is_some()
    }
}

/// HTTP service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer tokens accepted by the API. Empty disables authentication.
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    /// Seconds between scheduler evaluations
    pub scheduler_tick_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            api_keys: Vec::new(),
            scheduler_tick_secs: 60,
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Directory for synchronized assets (images)
    pub data_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub remote: RemoteConfig,
    pub server: ServerConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    remote: Option<RemoteConfig>,
    server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let default_data_dir = Self::default_data_dir();

        // Start with defaults
        let mut database_path = ConfigValue::new(
            default_data_dir.join("erp-bridge.db"),
            ConfigSource::Default,
        );
        let mut data_dir = ConfigValue::new(default_data_dir, ConfigSource::Default);
        let mut config_file = None;
        let mut remote = RemoteConfig::default();
        let mut server = ServerConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                database_path =
                    ConfigValue::new(Self::resolve_relative(&path, db_path), ConfigSource::File);
            }
            if let Some(dir) = file_config.data_dir {
                data_dir = ConfigValue::new(Self::resolve_relative(&path, dir), ConfigSource::File);
            }
            if let Some(remote_config) = file_config.remote {
                remote = remote_config;
            }
            if let Some(server_config) = file_config.server {
                server = server_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("ERP_BRIDGE_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(dir) = std::env::var("ERP_BRIDGE_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("ERP_BRIDGE_REMOTE_URL") {
            remote.base_url = Some(url);
        }
        if let Ok(org) = std::env::var("ERP_BRIDGE_ORGANIZATION_ID") {
            remote.organization_id = Some(org);
        }
        if let Ok(token) = std::env::var("ERP_BRIDGE_ACCESS_TOKEN") {
            remote.access_token = Some(token);
        }
        if let Ok(token) = std::env::var("ERP_BRIDGE_REFRESH_TOKEN") {
            remote.refresh_token = Some(token);
        }
        if let Ok(id) = std::env::var("ERP_BRIDGE_CLIENT_ID") {
            remote.client_id = Some(id);
        }
        if let Ok(secret) = std::env::var("ERP_BRIDGE_CLIENT_SECRET") {
            remote.client_secret = Some(secret);
        }
        if let Some(port) = std::env::var("ERP_BRIDGE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            server.port = port;
        }

        Ok(Self {
            database_path,
            data_dir,
            config_file,
            remote,
            server,
        })
    }

    /// Resolve relative paths against the config file's directory
    fn resolve_relative(config_path: &std::path::Path, path: PathBuf) -> PathBuf {
        if path.is_relative() {
            config_path
                .parent()
                .map(|p| p.join(&path))
                .unwrap_or(path)
        } else {
            path
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/erp-bridge/
    /// - macOS: ~/Library/Application Support/erp-bridge/
    /// - Windows: %APPDATA%/erp-bridge/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("erp-bridge")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/erp-bridge/
    /// - macOS: ~/Library/Application Support/erp-bridge/
    /// - Windows: %APPDATA%/erp-bridge/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("erp-bridge")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError(_, e) => Some(e),
            ConfigError::ParseError(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("erp-bridge.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.remote.page_size, 200);
        assert_eq!(config.remote.max_retries, 5);
        assert_eq!(config.server.scheduler_tick_secs, 60);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/db.sqlite").unwrap();
        writeln!(file, "remote:").unwrap();
        writeln!(file, "  base_url: https://books.example.com/api/v3").unwrap();
        writeln!(file, "  organization_id: \"60001\"").unwrap();
        writeln!(file, "  access_token: abc").unwrap();
        writeln!(file, "  page_size: 50").unwrap();
        writeln!(file, "server:").unwrap();
        writeln!(file, "  port: 9090").unwrap();
        writeln!(file, "  api_keys: [secret]").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/db.sqlite")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert!(config.remote.is_configured());
        assert!(!config.remote.can_refresh());
        assert_eq!(config.remote.page_size, 50);
        // Unspecified remote values keep their defaults
        assert_eq!(config.remote.max_retries, 5);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.api_keys, vec!["secret".to_string()]);
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: data/bridge.db").unwrap();
        writeln!(file, "data_dir: assets").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/bridge.db")
        );
        assert_eq!(config.data_dir.value, temp_dir.path().join("assets"));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /from/file.db").unwrap();

        std::env::set_var("ERP_BRIDGE_DATABASE_PATH", "/from/env.db");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.database_path.value, PathBuf::from("/from/env.db"));
        assert_eq!(config.database_path.source, ConfigSource::Environment);

        std::env::remove_var("ERP_BRIDGE_DATABASE_PATH");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut remote = RemoteConfig::default();
        remote.access_token = Some("top-secret".to_string());
        remote.client_secret = Some("also-secret".to_string());
        let json = serde_json::to_string(&remote).unwrap();
        assert!(!json.contains("top-secret"));
        assert!(!json.contains("also-secret"));
    }
}
