// src/logging.rs
// Tracing subscriber setup for binaries and test suites

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the default stderr subscriber with env-filter support.
///
/// Honors `RUST_LOG`; falls back to `kairo=info`. Idempotent so test
/// suites can call it from every entry point.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kairo=info"));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
