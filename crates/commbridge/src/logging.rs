//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence. Otherwise `COMMBRIDGE_LOG` picks the level for
//! this crate (debug, info, warn, error; default info). `LOG_FORMAT=json`
//! switches to JSON lines. Output always goes to stderr so stdout stays free
//! for the frame link.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter())
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter())
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(format!(
        "commbridge={}",
        level_from(std::env::var("COMMBRIDGE_LOG").ok().as_deref())
    ))
}

fn level_from(value: Option<&str>) -> &'static str {
    match value {
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_defaults_to_info() {
        assert_eq!(level_from(None), "info");
        assert_eq!(level_from(Some("verbose")), "info");
        assert_eq!(level_from(Some("warning")), "warn");
        assert_eq!(level_from(Some("debug")), "debug");
    }
}
