use crate::error::{Result, ScraperError};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum spacing between requests to the same host, in seconds.
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base for the exponential retry backoff, in seconds.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// How many consecutive date windows to harvest.
    #[serde(default = "default_window_count")]
    pub count: u32,
    /// Length of each window in days.
    #[serde(default = "default_window_length_days")]
    pub length_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_delay_secs() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> f64 {
    1.0
}

fn default_window_count() -> u32 {
    4
}

fn default_window_length_days() -> u32 {
    7
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            min_delay_secs: default_min_delay_secs(),
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            count: default_window_count(),
            length_days: default_window_length_days(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            windows: WindowConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Config::default());
        }
        let config_content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}

/// Credentials for the remote ingestion endpoint, read from the environment.
#[derive(Debug, Clone)]
pub struct IngestCredentials {
    pub api_url: String,
    pub api_token: String,
}

impl IngestCredentials {
    /// Returns `None` when either variable is unset, which downgrades
    /// publishing to a dry run.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("INGEST_API_URL").ok()?;
        let api_token = std::env::var("INGEST_API_TOKEN").ok()?;
        if api_url.trim().is_empty() || api_token.trim().is_empty() {
            return None;
        }
        Some(Self { api_url, api_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = Config::load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.windows.count, 4);
        assert_eq!(config.windows.length_days, 7);
        assert_eq!(config.output.dir, "output");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[windows]\ncount = 2\nlength_days = 14").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.windows.count, 2);
        assert_eq!(config.windows.length_days, 14);
        // Untouched sections keep their defaults
        assert_eq!(config.fetch.min_delay_secs, 2.0);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid = [toml").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
