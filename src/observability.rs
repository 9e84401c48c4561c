//! Logging setup.
//!
//! Verbosity comes from `RUST_LOG` when set, otherwise from the CLI's
//! `-v` count: warnings by default, `info` at `-v`, `debug` at `-vv`.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
