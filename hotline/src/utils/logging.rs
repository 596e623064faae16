use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize logging with tracing
///
/// - Reads filter from RUST_LOG environment variable if available
/// - Falls back to "hotline=debug,hotline_lib=debug,warn" if RUST_LOG is not set
/// - Safe to call more than once; later calls leave the first subscriber in place
///
/// # Example
///
/// ```no_run
/// use hotline_lib::utils::logging::init_logging;
///
/// init_logging();
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hotline=debug,hotline_lib=debug,warn"));

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_thread_names(true))
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Hotline logging initialized");
    }
}
