//! Command-line argument parsing for the Senet server.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Senet match server command-line arguments.
///
/// CLI values override settings loaded from `senet.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "senet-server", about = "Two-player Senet match server")]
pub struct CliArgs {
    /// Port to listen on (49152-65535; anything else falls back to 65000).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// IP address to bind (invalid input falls back to all interfaces).
    #[arg(short, long)]
    pub ip: Option<String>,

    /// Seconds a silent player has to come back before forfeiting.
    #[arg(short = 't', long)]
    pub reconnect_timeout: Option<u64>,

    /// Seconds a player has to finish a turn.
    #[arg(long)]
    pub turn_timeout: Option<u64>,

    /// Number of match slots.
    #[arg(long)]
    pub max_matches: Option<usize>,

    /// Maximum concurrent connections.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(ref ip) = args.ip {
            self.network.bind_address = ip.clone();
        }
        if let Some(secs) = args.reconnect_timeout {
            self.timing.reconnect_timeout_secs = secs;
        }
        if let Some(secs) = args.turn_timeout {
            self.timing.turn_timeout_secs = secs;
        }
        if let Some(n) = args.max_matches {
            self.matches.max_matches = n;
        }
        if let Some(n) = args.max_connections {
            self.network.max_connections = n;
        }
        if let Some(ref level) = args.log_level {
            self.logging.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(50123),
            ip: Some("192.168.1.1".to_string()),
            reconnect_timeout: Some(20),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 50123);
        assert_eq!(config.network.bind_address, "192.168.1.1");
        assert_eq!(config.timing.reconnect_timeout_secs, 20);
        // Non-overridden fields retain defaults
        assert_eq!(config.matches.max_matches, 5);
        assert_eq!(config.timing.turn_timeout_secs, 60);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::try_parse_from([
            "senet-server",
            "--port",
            "60000",
            "-i",
            "10.0.0.2",
            "-t",
            "15",
            "--max-matches",
            "8",
        ])
        .unwrap();
        assert_eq!(args.port, Some(60000));
        assert_eq!(args.ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(args.reconnect_timeout, Some(15));
        assert_eq!(args.max_matches, Some(8));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_port_outside_u16_rejected_by_parser() {
        assert!(CliArgs::try_parse_from(["senet-server", "--port", "70000"]).is_err());
    }
}
