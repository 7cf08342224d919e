//! broadcastd configuration types and loading

use chrono_tz::Tz;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scheduler::SchedulerConfig;

/// Main broadcastd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat bot API connection
    pub bot: BotConfig,

    /// Due-broadcast polling and fan-out
    pub scheduler: SchedulerConfig,

    /// Reference time zone for operator input
    pub schedule: ScheduleConfig,

    /// Inbound message routing
    pub router: RouterConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Segments created at startup
    pub segments: SegmentsConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        self.bot.get_token()?;
        self.schedule.tz()?;
        if self.bot.timeout() <= Duration::from_secs(self.bot.poll_time_secs) {
            return Err(eyre::eyre!(
                "bot.timeout-ms ({}) must exceed bot.poll-time-secs ({}s)",
                self.bot.timeout_ms,
                self.bot.poll_time_secs
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(eyre::eyre!("scheduler.poll-interval-secs must be greater than zero"));
        }
        if self.scheduler.max_concurrent_sends == 0 {
            return Err(eyre::eyre!("scheduler.max-concurrent-sends must be greater than zero"));
        }
        Ok(())
    }

    /// Load variables from a `.env` file in the working directory, if any
    ///
    /// Variables already set in the environment win.
    pub fn load_dotenv() {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => tracing::debug!("No .env file found"),
            Err(e) => tracing::warn!("Failed to load .env file: {}", e),
        }
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .broadcastd.yml
        let local_config = PathBuf::from(".broadcastd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/broadcastd/broadcastd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("broadcastd").join("broadcastd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// VK Teams bot API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the bot token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Long-poll wait passed to events/get, in seconds
    #[serde(rename = "poll-time-secs")]
    pub poll_time_secs: u64,

    /// Delay before re-polling after an error, in milliseconds
    #[serde(rename = "poll-backoff-ms")]
    pub poll_backoff_ms: u64,

    /// Request timeout in milliseconds (must exceed the long-poll wait)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            base_url: "https://myteam.mail.ru/bot/v1".to_string(),
            token_env: "BOT_TOKEN".to_string(),
            poll_time_secs: 30,
            poll_backoff_ms: 3_000,
            timeout_ms: 45_000,
        }
    }
}

impl BotConfig {
    /// Read the bot token from the configured environment variable
    pub fn get_token(&self) -> Result<String> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(eyre::eyre!(
                "Bot token not found. Set the {} environment variable (or add it to .env).",
                self.token_env
            )),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }
}

/// Reference time zone configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// IANA zone name operator input is interpreted in
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/Moscow".to_string(),
        }
    }
}

impl ScheduleConfig {
    /// Parse the configured zone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| eyre::eyre!("Invalid schedule.timezone '{}': {}", self.timezone, e))
    }
}

/// Inbound routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Inbound messages buffered between the receive stream and the router
    #[serde(rename = "lane-capacity")]
    pub lane_capacity: usize,

    /// Seconds a sender lane may sit idle before it exits
    #[serde(rename = "lane-idle-secs")]
    pub lane_idle_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lane_capacity: 32,
            lane_idle_secs: 300,
        }
    }
}

impl RouterConfig {
    pub fn lane_idle(&self) -> Duration {
        Duration::from_secs(self.lane_idle_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for BroadcastStore data
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/broadcastd on Linux)
        let store_dir = dirs::data_dir()
            .map(|d| d.join("broadcastd"))
            .unwrap_or_else(|| PathBuf::from(".broadcaststore"))
            .to_string_lossy()
            .into_owned();

        Self { store_dir }
    }
}

/// Segments ensured at daemon startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentsConfig {
    pub base: Vec<String>,
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            base: vec!["all".to_string(), "clients".to_string(), "workers".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.bot.base_url, "https://myteam.mail.ru/bot/v1");
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.schedule.timezone, "Europe/Moscow");
        assert_eq!(config.segments.base, vec!["all", "clients", "workers"]);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
bot:
  base-url: http://localhost:8080/bot/v1
  token-env: MY_BOT_TOKEN
  poll-time-secs: 10
  timeout-ms: 20000

scheduler:
  poll-interval-secs: 5
  max-concurrent-sends: 2

schedule:
  timezone: Europe/Berlin

router:
  lane-capacity: 4
  lane-idle-secs: 60

storage:
  store-dir: /var/lib/broadcastd

segments:
  base: [all, vip]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.bot.base_url, "http://localhost:8080/bot/v1");
        assert_eq!(config.bot.token_env, "MY_BOT_TOKEN");
        assert_eq!(config.bot.timeout(), Duration::from_secs(20));
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.max_concurrent_sends, 2);
        assert_eq!(config.schedule.tz().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.router.lane_idle(), Duration::from_secs(60));
        assert_eq!(config.storage.store_dir, "/var/lib/broadcastd");
        assert_eq!(config.segments.base, vec!["all", "vip"]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
scheduler:
  poll-interval-secs: 60
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.scheduler.poll_interval_secs, 60);

        // Defaults for unspecified
        assert_eq!(config.scheduler.max_concurrent_sends, 8);
        assert_eq!(config.bot.token_env, "BOT_TOKEN");
        assert_eq!(config.router.lane_capacity, 32);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let schedule = ScheduleConfig {
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(schedule.tz().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("custom.yml");
        fs::write(&path, "schedule:\n  timezone: UTC\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.schedule.tz().unwrap(), chrono_tz::UTC);

        let missing = temp.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    #[serial]
    fn test_token_from_env() {
        let bot = BotConfig {
            token_env: "BROADCASTD_TEST_TOKEN".to_string(),
            ..Default::default()
        };

        // SAFETY: serialized with other env-mutating tests
        unsafe { std::env::remove_var("BROADCASTD_TEST_TOKEN") };
        assert!(bot.get_token().is_err());

        unsafe { std::env::set_var("BROADCASTD_TEST_TOKEN", " 001.secret \n") };
        assert_eq!(bot.get_token().unwrap(), "001.secret");

        unsafe { std::env::remove_var("BROADCASTD_TEST_TOKEN") };
    }

    #[test]
    #[serial]
    fn test_validate_requires_token() {
        let mut config = Config::default();
        config.bot.token_env = "BROADCASTD_VALIDATE_TOKEN".to_string();

        unsafe { std::env::remove_var("BROADCASTD_VALIDATE_TOKEN") };
        assert!(config.validate().is_err());

        unsafe { std::env::set_var("BROADCASTD_VALIDATE_TOKEN", "tok") };
        assert!(config.validate().is_ok());

        config.scheduler.max_concurrent_sends = 0;
        assert!(config.validate().is_err());

        unsafe { std::env::remove_var("BROADCASTD_VALIDATE_TOKEN") };
    }

    #[test]
    #[serial]
    fn test_validate_timeout_must_exceed_poll_wait() {
        let mut config = Config::default();
        config.bot.token_env = "BROADCASTD_TIMEOUT_TOKEN".to_string();
        unsafe { std::env::set_var("BROADCASTD_TIMEOUT_TOKEN", "tok") };

        config.bot.poll_time_secs = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout-ms"));

        config.bot.poll_time_secs = 45;
        assert!(config.validate().is_err());

        config.bot.poll_time_secs = 30;
        assert!(config.validate().is_ok());

        unsafe { std::env::remove_var("BROADCASTD_TIMEOUT_TOKEN") };
    }
}
