use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_URL_ENV: &str = "YNMWEB_API_URL";
pub const API_KEY_ENV: &str = "YNMWEB_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("writing config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("required setting `{0}` is empty")]
    Empty(&'static str),
}

fn secs_f64<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn duration_from_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Sleep between iterations of each telemetry loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopIntervals {
    #[serde(serialize_with = "secs_f64", deserialize_with = "duration_from_secs")]
    pub fetch: Duration,
    #[serde(serialize_with = "secs_f64", deserialize_with = "duration_from_secs")]
    pub channels: Duration,
    #[serde(serialize_with = "secs_f64", deserialize_with = "duration_from_secs")]
    pub on_time: Duration,
    #[serde(serialize_with = "secs_f64", deserialize_with = "duration_from_secs")]
    pub server_uptime: Duration,
}

impl Default for LoopIntervals {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(180),
            channels: Duration::from_secs(300),
            on_time: Duration::from_secs(90),
            server_uptime: Duration::from_secs(90),
        }
    }
}

fn default_request_timeout() -> f64 {
    10.0
}

fn default_die_grace() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
    #[serde(default = "default_die_grace")]
    pub die_grace_secs: f64,
    #[serde(default)]
    pub intervals: LoopIntervals,
    /// Channels the standalone host starts in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            die_grace_secs: default_die_grace(),
            intervals: LoopIntervals::default(),
            channels: Vec::new(),
        }
    }
}

/// Validated endpoint and shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub url: String,
    pub key: String,
}

impl Config {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: Some(api_url.into()),
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Existing config at `path` with the endpoint and secret replaced. A
    /// missing file starts from defaults; an unreadable or malformed one is
    /// an error rather than being overwritten.
    pub fn configure(
        path: impl AsRef<Path>,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        match Self::from_file(path) {
            Ok(existing) => Ok(Self {
                api_url: Some(api_url.into()),
                api_key: Some(api_key.into()),
                ..existing
            }),
            Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(Self::new(api_url, api_key))
            }
            Err(e) => Err(e),
        }
    }

    /// Apply `YNMWEB_API_URL` / `YNMWEB_API_KEY` over whatever the file set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.api_url = Some(url);
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        self
    }

    /// Both settings must be present and non-blank.
    pub fn api_settings(&self) -> Result<ApiSettings, ConfigError> {
        let url = required(self.api_url.as_deref(), "api_url")?;
        let key = required(self.api_key.as_deref(), "api_key")?;
        Ok(ApiSettings { url, key })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_request_timeout()))
    }

    pub fn die_grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.die_grace_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_die_grace()))
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        fs::write(path, body).map_err(io_err)
    }
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        None => Err(ConfigError::Missing(field)),
        Some(v) if v.trim().is_empty() => Err(ConfigError::Empty(field)),
        Some(v) => Ok(v.trim().to_string()),
    }
}

/// Where activation reads its configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Re-read on every activation, so `rehash` picks up edits.
    File(PathBuf),
    Static(Config),
}

impl ConfigSource {
    pub fn load(&self) -> Result<Config, ConfigError> {
        match self {
            ConfigSource::File(path) => Ok(Config::from_file(path)?.with_env_overrides()),
            ConfigSource::Static(cfg) => Ok(cfg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r##"{{
                "api_url": "https://example.com/api.php",
                "api_key": "secret",
                "channels": ["#lobby"],
                "intervals": {{"fetch": 60, "on_time": 0.5}}
            }}"##
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let api = config.api_settings().unwrap();
        assert_eq!(api.url, "https://example.com/api.php");
        assert_eq!(api.key, "secret");
        assert_eq!(config.channels, vec!["#lobby".to_string()]);
        assert_eq!(config.intervals.fetch, Duration::from_secs(60));
        assert_eq!(config.intervals.on_time, Duration::from_millis(500));
        assert_eq!(config.intervals.channels, Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.die_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_intervals() {
        let intervals = LoopIntervals::default();
        assert_eq!(intervals.fetch.as_secs(), 180);
        assert_eq!(intervals.channels.as_secs(), 300);
        assert_eq!(intervals.on_time.as_secs(), 90);
        assert_eq!(intervals.server_uptime.as_secs(), 90);
    }

    #[test]
    fn test_config_missing_file() {
        let result = Config::from_file("/nonexistent/path/config.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{invalid json").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_configure_keeps_existing_settings() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r##"{{"api_url": "https://old", "api_key": "old", "channels": ["#keep"]}}"##)
            .unwrap();

        let cfg = Config::configure(file.path(), "https://new", "new").unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://new"));
        assert_eq!(cfg.api_key.as_deref(), Some("new"));
        assert_eq!(cfg.channels, vec!["#keep".to_string()]);
    }

    #[test]
    fn test_configure_starts_fresh_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::configure(dir.path().join("config.json"), "https://new", "k").unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://new"));
        assert!(cfg.channels.is_empty());
    }

    #[test]
    fn test_configure_refuses_malformed_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"channels\": [\"#keep\"],").unwrap();

        let result = Config::configure(file.path(), "https://new", "k");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_and_empty_settings() {
        let mut cfg = Config::new("https://example.com", "");
        assert!(matches!(cfg.api_settings(), Err(ConfigError::Empty("api_key"))));

        cfg.api_key = None;
        assert!(matches!(cfg.api_settings(), Err(ConfigError::Missing("api_key"))));

        let cfg = Config::new("   ", "key");
        assert!(matches!(cfg.api_settings(), Err(ConfigError::Empty("api_url"))));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::new("https://example.com/api", "k").write_file(&path).unwrap();

        let loaded = ConfigSource::File(path).load().unwrap();
        assert_eq!(loaded.api_url.as_deref(), Some("https://example.com/api"));
        assert_eq!(loaded.intervals, LoopIntervals::default());
    }
}
