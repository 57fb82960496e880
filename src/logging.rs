// src/logging.rs

//! Logging setup for front-ends embedding the engine

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies ("info" when
/// `None`). Calling this twice is harmless: the second call is ignored.
pub fn init(default_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or("info")));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
