use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Smallest ping payload: it carries an 8-byte send timestamp.
pub const MIN_MESSAGE_SIZE: usize = 8;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StrataConfig {
    /// Directory holding the counters file and the log files.
    #[serde(default = "defaults::dir")]
    pub dir: PathBuf,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub counters: CountersConfig,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub ping: PingConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CountersConfig {
    #[serde(default = "defaults::counters_file")]
    pub file: String,
    #[serde(default = "defaults::counters_capacity")]
    pub capacity: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LogSection {
    #[serde(default = "defaults::term_length")]
    pub term_length: usize,
    #[serde(default = "defaults::mtu")]
    pub mtu: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PingConfig {
    #[serde(default = "defaults::channel")]
    pub ping_channel: String,
    #[serde(default = "defaults::ping_stream_id")]
    pub ping_stream_id: i32,
    #[serde(default = "defaults::channel")]
    pub pong_channel: String,
    #[serde(default = "defaults::pong_stream_id")]
    pub pong_stream_id: i32,
    #[serde(default = "defaults::messages")]
    pub messages: u64,
    #[serde(default = "defaults::warmup_messages")]
    pub warmup_messages: u64,
    #[serde(default = "defaults::message_size")]
    pub message_size: usize,
    #[serde(default = "defaults::fragment_limit")]
    pub fragment_limit: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

mod defaults {
    use std::path::PathBuf;

    pub fn dir() -> PathBuf {
        "/dev/shm/strata".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn counters_file() -> String {
        "counters.dat".into()
    }

    pub fn counters_capacity() -> usize {
        1024
    }

    pub fn term_length() -> usize {
        64 * 1024
    }

    pub fn mtu() -> usize {
        1408
    }

    pub fn channel() -> String {
        "strata:ipc".into()
    }

    pub fn ping_stream_id() -> i32 {
        10
    }

    pub fn pong_stream_id() -> i32 {
        11
    }

    pub fn messages() -> u64 {
        100_000
    }

    pub fn warmup_messages() -> u64 {
        1_000
    }

    pub fn message_size() -> usize {
        32
    }

    pub fn fragment_limit() -> usize {
        10
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            dir: defaults::dir(),
            log_level: defaults::log_level(),
            counters: CountersConfig::default(),
            log: LogSection::default(),
            ping: PingConfig::default(),
        }
    }
}

impl Default for CountersConfig {
    fn default() -> Self {
        Self {
            file: defaults::counters_file(),
            capacity: defaults::counters_capacity(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            term_length: defaults::term_length(),
            mtu: defaults::mtu(),
        }
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            ping_channel: defaults::channel(),
            ping_stream_id: defaults::ping_stream_id(),
            pong_channel: defaults::channel(),
            pong_stream_id: defaults::pong_stream_id(),
            messages: defaults::messages(),
            warmup_messages: defaults::warmup_messages(),
            message_size: defaults::message_size(),
            fragment_limit: defaults::fragment_limit(),
        }
    }
}

impl StrataConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: StrataConfig = toml::from_str(&toml_to_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings the binaries cannot run with. Log geometry is
    /// validated again, in full, when a log is created.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.log.term_length.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "log.term_length {} is not a power of two",
                self.log.term_length
            )));
        }
        if self.ping.message_size < MIN_MESSAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "ping.message_size {} is below {MIN_MESSAGE_SIZE}",
                self.ping.message_size
            )));
        }
        if self.ping.fragment_limit == 0 {
            return Err(ConfigError::Invalid("ping.fragment_limit must be positive".into()));
        }
        if self.counters.capacity == 0 {
            return Err(ConfigError::Invalid("counters.capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn counters_path(&self) -> PathBuf {
        self.dir.join(&self.counters.file)
    }

    /// Conventional file for the log of `(channel, stream_id)`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` in the channel become `_`.
    pub fn log_path(&self, channel: &str, stream_id: i32) -> PathBuf {
        let channel: String = channel
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{channel}-{stream_id}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: StrataConfig = toml::from_str("").unwrap();
        assert_eq!(config, StrataConfig::default());
        assert_eq!(config.counters.capacity, 1024);
        assert_eq!(config.log.term_length, 65536);
        assert_eq!(config.ping.ping_stream_id, 10);
        assert_eq!(config.ping.pong_stream_id, 11);
    }

    #[test]
    fn sections_override_individual_fields() {
        let config: StrataConfig = toml::from_str(
            r#"
            dir = "/tmp/strata-test"
            log_level = "debug"

            [log]
            term_length = 1048576

            [ping]
            messages = 10
            pong_channel = "strata:udp?endpoint=localhost:40123"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log.term_length, 1 << 20);
        assert_eq!(config.log.mtu, 1408);
        assert_eq!(config.ping.messages, 10);
        assert_eq!(config.ping.warmup_messages, 1_000);
        assert_eq!(config.counters_path(), PathBuf::from("/tmp/strata-test/counters.dat"));
        assert_eq!(
            config.log_path(&config.ping.pong_channel, config.ping.pong_stream_id),
            PathBuf::from("/tmp/strata-test/strata_udp_endpoint_localhost_40123-11.log")
        );
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let mut config = StrataConfig::default();
        assert!(config.validate().is_ok());

        config.ping.message_size = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config = StrataConfig::default();
        config.ping.fragment_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config = StrataConfig::default();
        config.log.term_length = 60_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reports_missing_files_and_bad_toml() {
        let missing = std::env::temp_dir().join("strata_config_missing.toml");
        let err = StrataConfig::load(missing.display().to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let bad =
            std::env::temp_dir().join(format!("strata_config_bad_{}.toml", std::process::id()));
        std::fs::write(&bad, "counters = 3").unwrap();
        let err = StrataConfig::load(bad.display().to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let _ = std::fs::remove_file(&bad);
    }
}
