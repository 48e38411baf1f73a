//! Tracing setup
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | info | Filter directives |
//! | PORT_LISTENER_LOG_JSON | unset | `1` or `true` for JSON lines |

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_JSON_ENV: &str = "PORT_LISTENER_LOG_JSON";

fn json_requested() -> bool {
    std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json_requested() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
