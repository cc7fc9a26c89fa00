//! Tracing subscriber setup for binaries.
//!
//! The library only emits `tracing` events; nothing is printed unless a
//! binary (or test) installs a subscriber through [`init_logging`].

use std::io::IsTerminal;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn build_env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Install a stderr fmt layer filtered by `RUST_LOG` (default `info`, or
/// `debug` when requested). Returns false if a subscriber was already set.
pub fn init_logging(debug: bool) -> bool {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default()
        .with(build_env_filter(debug))
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
