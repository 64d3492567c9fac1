//! Tracing setup for the deployer binary.
//!
//! Diagnostics go to stderr through `tracing`. The run summary printed by the
//! binary goes to stdout and is unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise this crate logs at `info` (`debug`
/// with `-v`) and everything else at `warn`.
///
/// # Example
/// ```bash
/// RUST_LOG=deployer=trace deployer --dry-run
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,deployer=info",
        1 => "warn,deployer=debug",
        _ => "debug,deployer=trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_crate_level() {
        assert_eq!(default_directives(0), "warn,deployer=info");
        assert_eq!(default_directives(1), "warn,deployer=debug");
        assert_eq!(default_directives(5), "debug,deployer=trace");
    }
}
