//! Console logging setup.
//!
//! The crate itself only emits `tracing` events; installing a subscriber is the
//! application's call. [`init`] is the default one: fmt output filtered by
//! `RUST_LOG`, falling back to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global fmt subscriber.
///
/// Safe to call more than once; later calls leave the existing subscriber in place.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install the global fmt subscriber with a fallback filter directive.
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true),
        );

    if subscriber.try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized, keeping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_does_not_panic() {
        init();
        init_with_filter("debug");
        tracing::info!("logging initialized");
    }
}
