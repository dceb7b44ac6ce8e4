//! Diagnostic logging setup for the server binary

use crate::config::{LogFormat, LoggingSettings};
use crate::{CeeLogError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
#[cfg(not(feature = "journald"))]
use tracing_subscriber::layer::Identity;

/// Filter directive applied when `--verbose` is given
pub const VERBOSE_FILTER: &str = "ceelog=debug,tower_http=debug,info";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level; `verbose` wins over both.
/// Must be called exactly once at startup.
pub fn init_logging(settings: &LoggingSettings, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
    };

    let json = settings.format == LogFormat::Json;
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_ansi(false)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(journald_layer(settings)?)
        .try_init()
        .map_err(|e| CeeLogError::Config(format!("Failed to set tracing subscriber: {}", e)))
}

#[cfg(feature = "journald")]
fn journald_layer(settings: &LoggingSettings) -> Result<Option<tracing_journald::Layer>> {
    if !settings.journald {
        return Ok(None);
    }
    tracing_journald::layer()
        .map(|layer| Some(layer.with_syslog_identifier("ceelog".to_string())))
        .map_err(|e| CeeLogError::Config(format!("Failed to connect to journald: {}", e)))
}

#[cfg(not(feature = "journald"))]
fn journald_layer(settings: &LoggingSettings) -> Result<Option<Identity>> {
    if settings.journald {
        return Err(CeeLogError::Config(
            "journald logging requires the 'journald' feature".to_string(),
        ));
    }
    Ok(None)
}
