//! Tracing subscriber setup for hosts embedding the tutor

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (for example `"simtutor=info"`).
///
/// Returns `false` when a global subscriber was already installed; calling it
/// more than once is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused() {
        init_tracing("simtutor=debug");
        assert!(!init_tracing("simtutor=debug"));
    }
}
