//! Senet match server binary.
//!
//! Configuration is loaded from `senet.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p senet-server -- --port 65001 --max-matches 8`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use senet_config::{CliArgs, Config};
use senet_server::{GameServer, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args.config.clone().unwrap_or_else(|| {
        Config::default_dir().unwrap_or_else(|e| {
            eprintln!("{e}, using the working directory");
            PathBuf::from(".")
        })
    });

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    senet_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let server = Arc::new(GameServer::new(ServerConfig::from_config(&config)));
    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = runner => match result {
            Ok(Ok(())) => ExitCode::SUCCESS,
            Ok(Err(e)) => {
                tracing::error!("Server failed: {e}");
                ExitCode::FAILURE
            }
            Err(e) => {
                tracing::error!("Server task aborted: {e}");
                ExitCode::FAILURE
            }
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("Could not listen for Ctrl-C: {e}");
            }
            tracing::info!("Interrupted, shutting down");
            server.shutdown();
            ExitCode::SUCCESS
        }
    }
}
