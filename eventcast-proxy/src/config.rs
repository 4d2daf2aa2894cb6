//! Configuration file loading and merging with command line values.
//!
//! Precedence: command line > config file > built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::database::ChannelNumberingPolicy;
use crate::providers::FeedProviderConfig;
use crate::scheduler::RefreshConfig;
use crate::stream::{ReaperConfig, StreamConfig};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "eventcast.toml";

const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_DATABASE: &str = "eventcast.db";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
const DEFAULT_USER_AGENT: &str = concat!("eventcast/", env!("CARGO_PKG_VERSION"));

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub channels: ChannelsSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub providers: Vec<FeedProviderConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

/// Seed values for the channel numbering policy.
#[derive(Debug, Deserialize, Default)]
pub struct ChannelsSection {
    pub start_channel: Option<u32>,
    pub num_of_channels: Option<u32>,
    pub use_linear: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StreamSection {
    pub chunklist_ttl_secs: Option<u64>,
    pub upstream_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScheduleSection {
    pub refresh_interval_secs: Option<u64>,
    pub token_refresh_interval_secs: Option<u64>,
}

/// Values given explicitly on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub database: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_retention_days: Option<u64>,
    pub base_url: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug)]
pub struct Settings {
    pub listen: SocketAddr,
    pub database: PathBuf,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    pub log_level: Option<String>,
    pub base_url: Option<String>,
    pub policy: ChannelNumberingPolicy,
    pub stream: StreamConfig,
    pub reaper: ReaperConfig,
    pub refresh: RefreshConfig,
    pub user_agent: String,
    pub providers: Vec<FeedProviderConfig>,
}

/// Read and parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

impl Settings {
    /// Merge command line overrides, file values and defaults.
    pub fn resolve(overrides: Overrides, file: ConfigFile) -> Result<Self, ConfigError> {
        let listen = match overrides.listen {
            Some(addr) => addr,
            None => {
                let raw = file.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
                raw.parse()
                    .map_err(|e| ConfigError::Invalid(format!("server.listen {:?}: {}", raw, e)))?
            }
        };

        let base_url = overrides.base_url.or(file.server.base_url);
        if let Some(url) = &base_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {}", url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!("base_url {:?} must be http(s)", url)));
            }
        }

        let defaults = ChannelNumberingPolicy::default();
        let policy = ChannelNumberingPolicy {
            start_channel: file.channels.start_channel.unwrap_or(defaults.start_channel),
            num_of_channels: file.channels.num_of_channels.unwrap_or(defaults.num_of_channels),
            use_linear: file.channels.use_linear.unwrap_or(defaults.use_linear),
        };
        if policy.start_channel == 0 || policy.num_of_channels == 0 {
            return Err(ConfigError::Invalid(
                "channels.start_channel and channels.num_of_channels must be positive".to_string(),
            ));
        }

        let stream_defaults = StreamConfig::default();
        let stream = StreamConfig {
            chunklist_ttl: secs(file.stream.chunklist_ttl_secs, stream_defaults.chunklist_ttl),
            upstream_timeout: secs(file.stream.upstream_timeout_secs, stream_defaults.upstream_timeout),
        };

        let reaper_defaults = ReaperConfig::default();
        let reaper = ReaperConfig {
            sweep_interval: secs(file.stream.sweep_interval_secs, reaper_defaults.sweep_interval),
            idle_timeout: secs(file.stream.idle_timeout_secs, reaper_defaults.idle_timeout),
        };
        if reaper.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("stream.sweep_interval_secs must be positive".to_string()));
        }

        let refresh_defaults = RefreshConfig::default();
        let refresh = RefreshConfig {
            refresh_interval_secs: file
                .schedule
                .refresh_interval_secs
                .unwrap_or(refresh_defaults.refresh_interval_secs),
            token_refresh_interval_secs: file
                .schedule
                .token_refresh_interval_secs
                .unwrap_or(refresh_defaults.token_refresh_interval_secs),
        };
        if refresh.refresh_interval_secs == 0 || refresh.token_refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid("schedule intervals must be positive".to_string()));
        }

        let mut names = std::collections::HashSet::new();
        for provider in &file.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate provider {:?}", provider.name)));
            }
        }

        Ok(Self {
            listen,
            database: overrides
                .database
                .or_else(|| file.database.path.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            log_dir: overrides
                .log_dir
                .or_else(|| file.logging.log_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR)),
            log_retention_days: overrides
                .log_retention_days
                .or(file.logging.retention_days)
                .unwrap_or(DEFAULT_LOG_RETENTION_DAYS),
            log_level: file.logging.level,
            base_url,
            policy,
            stream,
            reaper,
            refresh,
            user_agent: file
                .stream
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            providers: file.providers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
listen = "127.0.0.1:9000"
base_url = "http://tuner.lan:9000"

[database]
path = "/var/lib/eventcast/events.db"

[logging]
retention_days = 3
level = "eventcast=debug"

[channels]
start_channel = 500
num_of_channels = 20
use_linear = true

[stream]
idle_timeout_secs = 120

[schedule]
refresh_interval_secs = 3600

[[providers]]
name = "gotham"
feed_url = "https://feeds.example.net/gotham.json"
token_url = "https://feeds.example.net/token"
api_key = "secret"

[[providers]]
name = "metro"
feed_url = "https://feeds.example.net/metro.json"
enabled = false
"#;

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(Overrides::default(), ConfigFile::default()).unwrap();

        assert_eq!(settings.listen, DEFAULT_LISTEN.parse().unwrap());
        assert_eq!(settings.database, PathBuf::from("eventcast.db"));
        assert_eq!(settings.log_retention_days, 7);
        assert_eq!(settings.policy, ChannelNumberingPolicy::default());
        assert_eq!(settings.reaper.idle_timeout, Duration::from_secs(300));
        assert_eq!(settings.refresh.refresh_interval_secs, 4 * 3600);
        assert!(settings.providers.is_empty());
        assert!(settings.base_url.is_none());
    }

    #[test]
    fn test_file_values() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let settings = Settings::resolve(Overrides::default(), file).unwrap();

        assert_eq!(settings.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(settings.database, PathBuf::from("/var/lib/eventcast/events.db"));
        assert_eq!(settings.log_level.as_deref(), Some("eventcast=debug"));
        assert_eq!(
            settings.policy,
            ChannelNumberingPolicy { start_channel: 500, num_of_channels: 20, use_linear: true }
        );
        assert_eq!(settings.reaper.idle_timeout, Duration::from_secs(120));
        assert_eq!(settings.reaper.sweep_interval, Duration::from_secs(60));
        assert_eq!(settings.refresh.refresh_interval_secs, 3600);
        assert_eq!(settings.providers.len(), 2);
        assert!(settings.providers[0].enabled);
        assert!(!settings.providers[1].enabled);
        assert_eq!(settings.providers[0].api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_command_line_wins() {
        let file: ConfigFile = toml::from_str(SAMPLE).unwrap();
        let overrides = Overrides {
            listen: Some("0.0.0.0:1234".parse().unwrap()),
            database: Some(PathBuf::from("other.db")),
            log_dir: None,
            log_retention_days: Some(30),
            base_url: Some("https://tv.example.org".to_string()),
        };
        let settings = Settings::resolve(overrides, file).unwrap();

        assert_eq!(settings.listen.port(), 1234);
        assert_eq!(settings.database, PathBuf::from("other.db"));
        assert_eq!(settings.log_dir, PathBuf::from("logs"));
        assert_eq!(settings.log_retention_days, 30);
        assert_eq!(settings.base_url.as_deref(), Some("https://tv.example.org"));
    }

    #[test]
    fn test_invalid_values() {
        let file: ConfigFile = toml::from_str("[server]\nlisten = \"nowhere\"").unwrap();
        assert!(matches!(Settings::resolve(Overrides::default(), file), Err(ConfigError::Invalid(_))));

        let file: ConfigFile = toml::from_str("[channels]\nnum_of_channels = 0").unwrap();
        assert!(matches!(Settings::resolve(Overrides::default(), file), Err(ConfigError::Invalid(_))));

        let file: ConfigFile = toml::from_str("[server]\nbase_url = \"ftp://tuner.lan\"").unwrap();
        assert!(matches!(Settings::resolve(Overrides::default(), file), Err(ConfigError::Invalid(_))));

        let dup = "[[providers]]\nname = \"a\"\nfeed_url = \"x\"\n[[providers]]\nname = \"a\"\nfeed_url = \"y\"";
        let file: ConfigFile = toml::from_str(dup).unwrap();
        assert!(matches!(Settings::resolve(Overrides::default(), file), Err(ConfigError::Invalid(_))));

        assert!(toml::from_str::<ConfigFile>("[channels]\nstart_channel = \"ten\"").is_err());
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eventcast.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let file = load_config(&path).unwrap();
        assert_eq!(file.providers.len(), 2);

        assert!(matches!(load_config(&dir.path().join("missing.toml")), Err(ConfigError::Io { .. })));
    }
}
