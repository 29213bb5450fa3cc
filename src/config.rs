use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use shellexpand;
use std::path::{Path, PathBuf};

/// Main configuration structure for repolens
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// GitHub API and authentication settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Paginated fetch behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Clone behavior
    #[serde(default)]
    pub clone: CloneConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token", "none"

    /// API base URL (overridable for GitHub Enterprise and tests)
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

/// Paginated fetch configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    /// Records requested per page (GitHub caps this at 100)
    #[serde(default = "default_page_size")]
    pub page_size: u8,

    /// Bounded retries for transient network failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries, in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_base_ms: u64,
}

/// Clone configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CloneConfig {
    /// Default destination directory for cloned repositories
    #[serde(default = "default_destination")]
    pub destination: String,

    /// Wall-clock timeout for a single clone in seconds
    #[serde(default = "default_clone_timeout")]
    pub timeout: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_page_size() -> u8 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_destination() -> String {
    "${HOME}/dev".to_string()
}
fn default_clone_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            api_base: default_api_base(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_ms(),
        }
    }
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            timeout: default_clone_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GitHubConfig::default(),
            fetch: FetchConfig::default(),
            clone: CloneConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repolens").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.clone.destination = shellexpand::full(&self.clone.destination)
            .context("Failed to expand clone destination path")?
            .into_owned();

        Ok(())
    }

    /// Effective page size, clamped to the API maximum of 100
    pub fn page_size(&self) -> u8 {
        self.fetch.page_size.clamp(1, 100)
    }

    /// Clone timeout as a std Duration
    pub fn clone_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.clone.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.github.auth_method, "auto");
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.fetch.page_size, 100);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.backoff_base_ms, 500);
        assert_eq!(config.clone.timeout, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.color);
    }

    #[test]
    fn test_page_size_clamped() {
        let mut config = Config::default();
        config.fetch.page_size = 0;
        assert_eq!(config.page_size(), 1);

        config.fetch.page_size = 100;
        assert_eq!(config.page_size(), 100);
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        let result = Config::load(nonexistent_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = Config::default();
        config.github.auth_method = "token".to_string();
        config.fetch.page_size = 50;
        config.clone.destination = "/custom/path".to_string();
        config.clone.timeout = 60;

        config.save(&config_path).expect("Failed to save config");

        let loaded_config = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded_config.github.auth_method, "token");
        assert_eq!(loaded_config.fetch.page_size, 50);
        assert_eq!(loaded_config.clone.destination, "/custom/path");
        assert_eq!(loaded_config.clone.timeout, 60);
    }

    #[test]
    fn test_config_default_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("repolens"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
github:
  auth_method: "gh_cli"
  api_base: "https://github.example.com/api/v3"
fetch:
  page_size: 30
  max_retries: 5
  backoff_base_ms: 250
clone:
  destination: "${HOME}/src"
  timeout: 600
logging:
  level: "debug"
  color: false
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.github.auth_method, "gh_cli");
        assert_eq!(config.github.api_base, "https://github.example.com/api/v3");
        assert_eq!(config.fetch.page_size, 30);
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.backoff_base_ms, 250);
        assert_eq!(config.clone.destination, "${HOME}/src");
        assert_eq!(config.clone.timeout, 600);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.color);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml_content = r#"
fetch:
  page_size: 10
"#;
        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.fetch.page_size, 10);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.github.auth_method, "auto");
        assert_eq!(config.clone.timeout, 300);
    }
}
