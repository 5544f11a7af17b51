//! Logging setup for the command line tools.

use tracing_subscriber::EnvFilter;

/// Installs a stderr subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `level` filters events. Calling it
/// twice is harmless.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Level to log at: the configured one, raised to `debug` by `-v`.
pub fn level_for(configured: &str, verbose: bool) -> &str {
    if verbose {
        "debug"
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_raises_level() {
        assert_eq!(level_for("warn", true), "debug");
        assert_eq!(level_for("warn", false), "warn");
    }

    #[test]
    fn test_init_twice() {
        init("info");
        init("debug");
        tracing::info!("logging initialised");
    }
}
