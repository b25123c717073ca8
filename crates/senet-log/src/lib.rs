//! Structured logging for the Senet server.
//!
//! Console output goes through a human-readable `fmt` layer with uptime
//! timestamps and module paths. Debug builds (or `logging.file_logging`)
//! additionally write newline-delimited JSON to `senet-server.log` for
//! post-mortem analysis of a match. The level comes from `RUST_LOG` when set,
//! otherwise from the loaded configuration.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use senet_config::Config;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::Uptime;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Name of the JSON log file created inside the log directory.
pub const LOG_FILE_NAME: &str = "senet-server.log";

const DEFAULT_FILTER: &str = "info";

/// The JSON layer written to [`LOG_FILE_NAME`].
pub type JsonFileLayer<S> = fmt::Layer<S, JsonFields, Format<Json, Uptime>, File>;

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file
/// * `debug_build` - whether file logging is on regardless of config
/// * `config` - loaded configuration supplying the level and the file toggle
///
/// ```no_run
/// use senet_config::Config;
/// use senet_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let want_file = debug_build || config.is_some_and(|c| c.logging.file_logging);
    if want_file && let Some(log_dir) = log_dir {
        match json_file_layer(log_dir) {
            Ok((layer, path)) => {
                subscriber.with(layer).init();
                tracing::debug!(path = %path.display(), "JSON file logging enabled");
                return;
            }
            Err(e) => {
                subscriber.init();
                tracing::warn!(dir = %log_dir.display(), error = %e, "File logging unavailable");
                return;
            }
        }
    }

    subscriber.init();
}

/// The filter string used when `RUST_LOG` is not set.
pub fn filter_directive(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.logging.log_level.trim().is_empty() => {
            config.logging.log_level.trim().to_string()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Build the JSON file layer, creating `log_dir` if needed.
///
/// Returns the layer and the path of the file it writes to.
pub fn json_file_layer<S>(log_dir: &Path) -> io::Result<(JsonFileLayer<S>, PathBuf)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE_NAME);
    let file = File::create(&path)?;
    let layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json();
    Ok((layer, path))
}
