//! Tracing setup for the angel binary.
//!
//! Logs always go to stderr: in stdio mode stdout is the client channel.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive for an `ANGEL_LOG` value.
fn filter_directive(level: Option<&str>) -> String {
    let level = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("angel={level}")
}

/// Initialize tracing with RUST_LOG, ANGEL_LOG and LOG_FORMAT support.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter_directive(std::env::var("ANGEL_LOG").ok().as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_levels_to_directives() {
        assert_eq!(filter_directive(None), "angel=info");
        assert_eq!(filter_directive(Some("debug")), "angel=debug");
        assert_eq!(filter_directive(Some("warning")), "angel=warn");
        assert_eq!(filter_directive(Some("nonsense")), "angel=info");
    }
}
