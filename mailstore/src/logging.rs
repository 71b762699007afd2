//! Tracing subscriber setup for embedding applications and tests

use tracing_subscriber::EnvFilter;

fn default_filter() -> EnvFilter {
    // RUST_LOG wins when set
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailstore=debug,info")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Install a global fmt subscriber. Panics if one is already installed.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(default_filter()).init();
}

/// Install a global fmt subscriber unless one is already present.
///
/// Returns `true` when this call installed it.
pub fn try_init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_idempotent() {
        try_init();
        assert!(!try_init());
    }
}
