//! Tracing subscriber setup for the binary.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "TYPECASE_LOG";

/// The default filter for a verbosity level (`-q` = -1, `-v` = 1, `-vv` = 2).
pub fn default_directive(verbosity: i8) -> &'static str {
    match verbosity {
        i8::MIN..=-1 => "error",
        0 => "warn",
        1 => "typecase=info",
        2 => "typecase=debug",
        _ => "typecase=trace",
    }
}

/// Installs a stderr fmt subscriber. Calling it twice is harmless.
pub fn init_logging(verbose: u8, quiet: bool) {
    let verbosity = if quiet { -1 } else { verbose.min(i8::MAX as u8) as i8 };
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
