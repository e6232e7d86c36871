//! Structured logging setup for shipyard
//!
//! Logs go to stderr so stdout stays clean for json/yaml run reports.
//! `RUST_LOG` directives are honoured on top of the configured level.
//!
//! # Example
//!
//! ```no_run
//! use shipyard::util::{init_logging, LoggingConfig};
//! use tracing::Level;
//!
//! init_logging(LoggingConfig::with_level(Level::DEBUG));
//! tracing::info!(target_env = "docker-dev", "Deploying");
//! ```

use std::env;
use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose chatter is capped at `warn` unless `RUST_LOG` says otherwise
const NOISY_CRATES: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "ignore", "globset"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,

    /// Use JSON output format (for log shipping in CI and production)
    pub use_json: bool,

    /// Include the module target (e.g., shipyard::build) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level plus `SHIPYARD_LOG_JSON` (`1`, `true` or `yes`) for JSON lines.
    pub fn from_env(level: Level) -> Self {
        let use_json = env::var("SHIPYARD_LOG_JSON")
            .map(|v| is_enabled(&v))
            .unwrap_or(false);

        Self {
            level,
            use_json,
            include_target: use_json,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

fn is_enabled(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parses a log level, falling back to INFO on anything unrecognised.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Effective level from the CLI flags: `--quiet` wins, then `-v`/`-vv`,
/// then an explicit `--log-level`, then the configured default.
pub fn resolve_level(explicit: Option<&str>, verbose: u8, quiet: bool, fallback: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => parse_level(explicit.unwrap_or(fallback)),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn directive(raw: &str) -> Option<Directive> {
    raw.parse().ok()
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(config.level).into())
            .from_env_lossy();

        if env::var("RUST_LOG").is_err() {
            if let Some(d) = directive(&format!("shipyard={}", config.level)) {
                filter = filter.add_directive(d);
            }
            for krate in NOISY_CRATES {
                if let Some(d) = directive(&format!("{}=warn", krate)) {
                    filter = filter.add_directive(d);
                }
            }
        }

        let layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_thread_names(config.include_thread_ids);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        } else {
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    });
}
