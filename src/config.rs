use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ssid: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    pub device: DeviceConfig,
    pub service: ServiceConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// MD01 positioner connection and safety limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,
    #[serde(default, with = "option_duration")]
    pub reconnect_backoff: Option<Duration>,
    #[serde(default = "default_poll_rate", with = "duration")]
    pub poll_rate: Duration,
    /// Azimuth rate limit, deg/s.
    pub az_thresh: f64,
    /// Elevation rate limit, deg/s.
    pub el_thresh: f64,
}

impl DeviceConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Pause between failed connection attempts. Falls back to the connect timeout.
    pub fn reconnect_backoff(&self) -> Duration {
        self.reconnect_backoff.unwrap_or(self.timeout)
    }
}

/// Client-facing TCP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_ip")]
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,
    #[serde(default = "default_watchdog", with = "duration")]
    pub watchdog_interval: Duration,
    #[serde(default)]
    pub invalid_frames: InvalidFramePolicy,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ServiceConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// What to do with a client line that does not parse as a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidFramePolicy {
    #[default]
    Drop,
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_tick", with = "duration")]
    pub tick: Duration,
    /// ACTIVE sessions with no motion command for this long fall back to STANDBY.
    #[serde(default, with = "option_duration")]
    pub session_timeout: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            session_timeout: None,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_rate() -> Duration {
    Duration::from_millis(250)
}

fn default_service_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_watchdog() -> Duration {
    Duration::from_secs(60)
}

fn default_queue_capacity() -> usize {
    32
}

fn default_tick() -> Duration {
    Duration::from_millis(100)
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.trim().is_empty() {
            return Err(ConfigError::Invalid("ssid must not be empty".into()));
        }
        let thresholds = [self.device.az_thresh, self.device.el_thresh];
        if thresholds.iter().any(|t| t.is_nan() || *t <= 0.0) {
            return Err(ConfigError::Invalid(
                "device.az_thresh and device.el_thresh must be positive".into(),
            ));
        }
        let durations = [
            ("device.timeout", self.device.timeout),
            ("device.poll_rate", self.device.poll_rate),
            ("device.reconnect_backoff", self.device.reconnect_backoff()),
            ("service.timeout", self.service.timeout),
            ("service.watchdog_interval", self.service.watchdog_interval),
            ("daemon.tick", self.daemon.tick),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        if matches!(self.daemon.session_timeout, Some(d) if d.is_zero()) {
            return Err(ConfigError::Invalid(
                "daemon.session_timeout must be non-zero".into(),
            ));
        }
        if self.service.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "service.queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Session log root, if session logging is enabled.
    pub fn session_dir(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}

mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}

mod option_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
ssid: VUL
log_path: /tmp/trackd
device:
  ip: 192.168.1.20
  port: 2000
  timeout: 2s
  reconnect_backoff: 5s
  poll_rate: 250ms
  az_thresh: 4.0
  el_thresh: 3.5
service:
  ip: 127.0.0.1
  port: 2001
  timeout: 1s
  watchdog_interval: 30s
  invalid_frames: reply
  queue_capacity: 8
daemon:
  tick: 50ms
  session_timeout: 5m
"#;

    const MINIMAL: &str = r#"
ssid: VUL
device:
  ip: 10.0.0.1
  port: 2000
  az_thresh: 4.0
  el_thresh: 4.0
service:
  port: 2001
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.ssid, "VUL");
        assert_eq!(config.device.addr(), "192.168.1.20:2000");
        assert_eq!(config.device.timeout, Duration::from_secs(2));
        assert_eq!(config.device.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(config.device.poll_rate, Duration::from_millis(250));
        assert_eq!(config.device.el_thresh, 3.5);
        assert_eq!(config.service.invalid_frames, InvalidFramePolicy::Reply);
        assert_eq!(config.service.queue_capacity, 8);
        assert_eq!(config.daemon.tick, Duration::from_millis(50));
        assert_eq!(config.daemon.session_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.session_dir(), Some(Path::new("/tmp/trackd")));
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.device.timeout, Duration::from_secs(1));
        assert_eq!(config.device.reconnect_backoff(), config.device.timeout);
        assert_eq!(config.service.addr(), "0.0.0.0:2001");
        assert_eq!(config.service.watchdog_interval, Duration::from_secs(60));
        assert_eq!(config.service.invalid_frames, InvalidFramePolicy::Drop);
        assert_eq!(config.daemon.tick, Duration::from_millis(100));
        assert!(config.daemon.session_timeout.is_none());
        assert!(config.session_dir().is_none());
    }

    #[test]
    fn rejects_bad_values() {
        let no_ssid = MINIMAL.replace("ssid: VUL", "ssid: \"\"");
        assert!(matches!(
            Config::from_yaml(&no_ssid),
            Err(ConfigError::Invalid(_))
        ));

        let bad_thresh = MINIMAL.replace("az_thresh: 4.0", "az_thresh: 0.0");
        assert!(matches!(
            Config::from_yaml(&bad_thresh),
            Err(ConfigError::Invalid(_))
        ));

        let bad_duration = FULL.replace("poll_rate: 250ms", "poll_rate: soon");
        assert!(matches!(
            Config::from_yaml(&bad_duration),
            Err(ConfigError::Yaml(_))
        ));

        let zero_queue = FULL.replace("queue_capacity: 8", "queue_capacity: 0");
        assert!(matches!(
            Config::from_yaml(&zero_queue),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file_and_serializes_as_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["device"]["poll_rate"], "250ms");
        assert_eq!(json["daemon"]["session_timeout"], "5m");
        assert_eq!(json["service"]["invalid_frames"], "reply");
    }
}
