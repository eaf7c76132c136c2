//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries call [`init`] once to
//! install a formatter; `RUST_LOG` takes precedence over the CLI verbosity.

use tracing_subscriber::EnvFilter;

/// Width of the `#` frame drawn by [`log_banner`].
const BANNER_WIDTH: usize = 60;

/// Map a `-v` count to a default filter directive.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, embedding
/// applications).
pub fn init(verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Format a centred, `#`-framed banner.
pub fn banner_lines(msg: &str) -> [String; 3] {
    let frame = "#".repeat(BANNER_WIDTH);
    let centred = format!("{:^width$}", msg, width = BANNER_WIDTH)
        .trim_end()
        .to_string();
    [frame.clone(), centred, frame]
}

/// Log a message that must stand out (connect failure, escalation).
pub fn log_banner(msg: &str) {
    for line in banner_lines(msg) {
        tracing::error!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), "info");
        assert_eq!(level_for_verbosity(1), "debug");
        assert_eq!(level_for_verbosity(5), "trace");
    }

    #[test]
    fn test_banner_lines() {
        let [top, mid, bottom] = banner_lines("Could not connect");
        assert_eq!(top.len(), BANNER_WIDTH);
        assert_eq!(top, bottom);
        assert!(mid.trim_start().starts_with("Could not connect"));
        assert!(mid.starts_with(' '));
    }
}
