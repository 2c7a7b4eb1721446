//! Diagnostic logging for the loaded library
//!
//! The library has no `main`, so the subscriber is installed from
//! `JNI_OnLoad`. An embedding process that already installed a global
//! subscriber keeps it.

use std::sync::Once;

/// Environment variable with a filter for bridge logging only
pub const LOG_ENV: &str = "HOSTCALL_LOG";

static LOG_INIT: Once = Once::new();

/// Install a stderr `fmt` subscriber once per process.
///
/// Filter precedence: `HOSTCALL_LOG`, `RUST_LOG`, then `default_filter`.
pub fn init(default_filter: &str) {
    LOG_INIT.call_once(|| {
        use tracing_subscriber::fmt;
        use tracing_subscriber::EnvFilter;

        let filter_expr = std::env::var(LOG_ENV)
            .ok()
            .or_else(|| std::env::var("RUST_LOG").ok())
            .filter(|expr| !expr.trim().is_empty());

        let builder = fmt().with_writer(std::io::stderr).with_target(true);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => match EnvFilter::try_new(default_filter) {
                Ok(filter) => builder.with_env_filter(filter),
                Err(_) => builder.with_env_filter(EnvFilter::new(DEFAULT_FILTER)),
            },
        };

        let _ = builder.try_init();
    });
}

const DEFAULT_FILTER: &str = "hostcall=warn";
