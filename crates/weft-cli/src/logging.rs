//! Log subscriber setup
//!
//! Filter directives come from `WEFT_LOG`, then `RUST_LOG`; without either
//! the level is `info`, or `debug` with `--verbose`. Output goes to stderr.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read before `RUST_LOG`
pub const LOG_ENV: &str = "WEFT_LOG";

/// Default directive for the verbosity flag
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

fn make_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging(verbose: bool) {
    let use_ansi = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    let subscriber = fmt::fmt()
        .with_env_filter(make_filter(verbose))
        .with_ansi(use_ansi)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
