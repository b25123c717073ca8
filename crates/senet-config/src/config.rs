//! Configuration structs with sensible defaults and RON persistence.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the config inside the config directory.
pub const CONFIG_FILE_NAME: &str = "senet.ron";

/// Port used when none is configured or the configured one is out of range.
pub const DEFAULT_PORT: u16 = 65000;

/// Ports the server may listen on (the dynamic/private range).
pub const PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listening socket.
    pub network: NetworkConfig,
    /// Match pool and nickname handshake.
    pub matches: MatchConfig,
    /// Protocol deadlines.
    pub timing: TimingConfig,
    /// Board legality checks.
    pub rules: RulesConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// IP address to bind. Anything unparsable falls back to `0.0.0.0`.
    pub bind_address: String,
    /// TCP port, valid within [`PORT_RANGE`].
    pub port: u16,
    /// Concurrent connections accepted before new ones are turned away.
    pub max_connections: usize,
}

/// Match pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchConfig {
    /// Number of match slots allocated at startup.
    pub max_matches: usize,
    /// Failed nickname attempts before the connection is closed.
    pub max_nick_attempts: u32,
}

/// Protocol deadlines. Seconds unless the field says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Grace period for a silent player before the match is forfeited.
    pub reconnect_timeout_secs: u64,
    /// Time a player has to finish a turn before the grace period starts.
    pub turn_timeout_secs: u64,
    /// Silence after which the server pings the client.
    pub alive_interval_secs: u64,
    /// Time the client has to answer a ping.
    pub alive_timeout_secs: u64,
    /// Time a new connection has to send its nickname.
    pub nickname_timeout_secs: u64,
    /// Longest pause allowed between two bytes of one message.
    pub byte_timeout_secs: u64,
    /// Longest a single outbound message may take to write.
    pub write_timeout_secs: u64,
    /// Interval at which waiting sessions re-check the match, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Board legality checks applied to every reported turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    /// Reject two pieces of one player on the same square.
    pub forbid_stacking: bool,
    /// Reject a square held by both players.
    pub forbid_overlap: bool,
    /// Reject a borne-off piece coming back onto the board.
    pub forbid_reentry: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (e.g., "info", "senet_match=debug").
    pub log_level: String,
    /// Also write JSON logs to a file in the log directory.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED.to_string(),
            port: DEFAULT_PORT,
            max_connections: 10,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_matches: 5,
            max_nick_attempts: 3,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout_secs: 10,
            turn_timeout_secs: 60,
            alive_interval_secs: 5,
            alive_timeout_secs: 10,
            nickname_timeout_secs: 30,
            byte_timeout_secs: 10,
            write_timeout_secs: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            forbid_stacking: true,
            forbid_overlap: true,
            forbid_reentry: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
        }
    }
}

// --- Derived values ---

impl NetworkConfig {
    /// The configured port, or [`DEFAULT_PORT`] if it lies outside
    /// [`PORT_RANGE`].
    pub fn listen_port(&self) -> u16 {
        if PORT_RANGE.contains(&self.port) {
            self.port
        } else {
            log::warn!(
                "Port {} is outside {}..={}, using {DEFAULT_PORT}",
                self.port,
                PORT_RANGE.start(),
                PORT_RANGE.end()
            );
            DEFAULT_PORT
        }
    }

    /// The configured IP, or the IPv4 wildcard if it does not parse.
    pub fn bind_ip(&self) -> IpAddr {
        self.bind_address.trim().parse().unwrap_or_else(|_| {
            log::warn!(
                "Invalid bind address {:?}, listening on all interfaces",
                self.bind_address
            );
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        })
    }

    /// Address to bind the listener to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip(), self.listen_port())
    }
}

impl TimingConfig {
    /// Grace period for a silent player.
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.reconnect_timeout_secs)
    }

    /// Turn deadline.
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Silence before a ping.
    pub fn alive_interval(&self) -> Duration {
        Duration::from_secs(self.alive_interval_secs)
    }

    /// Ping answer deadline.
    pub fn alive_timeout(&self) -> Duration {
        Duration::from_secs(self.alive_timeout_secs)
    }

    /// Nickname deadline.
    pub fn nickname_timeout(&self) -> Duration {
        Duration::from_secs(self.nickname_timeout_secs)
    }

    /// Inter-byte deadline.
    pub fn byte_timeout(&self) -> Duration {
        Duration::from_secs(self.byte_timeout_secs)
    }

    /// Write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Session poll interval, never below one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// --- Load / Save ---

impl Config {
    /// Platform config directory for the server (e.g. `~/.config/senet`).
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("senet"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as [`CONFIG_FILE_NAME`].
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::WriteError {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::WriteError {
            path: config_path.clone(),
            source,
        })?;
        Ok(())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_limits() {
        let config = Config::default();
        assert_eq!(config.network.port, 65000);
        assert_eq!(config.network.max_connections, 10);
        assert_eq!(config.matches.max_matches, 5);
        assert_eq!(config.matches.max_nick_attempts, 3);
        assert_eq!(config.timing.reconnect_timeout(), Duration::from_secs(10));
        assert_eq!(config.timing.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 65000"));
        assert!(ron_str.contains("reconnect_timeout_secs: 10"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(network: (port: 50000))").unwrap();
        assert_eq!(config.network.port, 50000);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(spectators: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_port_out_of_range_falls_back() {
        let mut network = NetworkConfig::default();
        network.port = 8080;
        assert_eq!(network.listen_port(), DEFAULT_PORT);
        network.port = 49152;
        assert_eq!(network.listen_port(), 49152);
        network.port = 65535;
        assert_eq!(network.listen_port(), 65535);
    }

    #[test]
    fn test_invalid_ip_falls_back_to_any() {
        let mut network = NetworkConfig::default();
        network.bind_address = "not-an-ip".to_string();
        assert_eq!(network.bind_ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        network.bind_address = " 127.0.0.1 ".to_string();
        assert_eq!(network.bind_addr(), "127.0.0.1:65000".parse().unwrap());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let timing = TimingConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(timing.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.port = 50500;
        config.matches.max_matches = 12;
        config.rules.forbid_overlap = false;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_invalid_ron_produces_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
