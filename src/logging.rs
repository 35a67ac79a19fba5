use log::{debug, error, info, log_enabled, warn, Level, LevelFilter};

/// Initializes the logger with the `env_logger` crate.
///
/// `RUST_LOG` takes precedence; otherwise the filter is `debug` when `debug`
/// is set and `info` if not. Calling it more than once is harmless.
pub fn init_logger(debug: bool) {
    let default = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    let _ = env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}
