// SPDX-License-Identifier: PolyForm-Shield-1.0

use tracing_subscriber::EnvFilter;

/// install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to every
/// target. logs go to stderr so stdout carries only generated text.
pub fn init_tracing_with(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // a second init (tests, embedding hosts) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn init_tracing() {
    init_tracing_with("info");
}
