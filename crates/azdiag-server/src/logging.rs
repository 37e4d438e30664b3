//! Logging setup

use azdiag::config::Settings;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "azdiag=info,azdiag_server=info,tower_http=info";

/// Filter from `AZDIAG_LOG`, then `RUST_LOG`, then the default. Directives
/// that fail to parse fall through to the next source.
pub fn env_filter(settings: &Settings) -> EnvFilter {
    ["AZDIAG_LOG", "RUST_LOG"]
        .iter()
        .filter_map(|variable| settings.lookup(variable))
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn json_requested(settings: &Settings) -> bool {
    settings
        .lookup("AZDIAG_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Install the global subscriber. Logs go to stderr so `azdiag run --json`
/// keeps stdout clean.
pub fn init(settings: &Settings) {
    let registry = tracing_subscriber::registry().with(env_filter(settings));
    let result = if json_requested(settings) {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_azdiag_log_wins_over_rust_log() {
        let settings =
            Settings::from_pairs([("AZDIAG_LOG", "azdiag=trace"), ("RUST_LOG", "warn")]).unwrap();
        assert_eq!(env_filter(&settings).to_string(), "azdiag=trace");

        let settings = Settings::from_pairs([("RUST_LOG", "warn")]).unwrap();
        assert_eq!(env_filter(&settings).to_string(), "warn");

        assert!(env_filter(&Settings::empty())
            .to_string()
            .contains("tower_http=info"));
    }

    #[test]
    fn test_invalid_directives_fall_through() {
        let settings =
            Settings::from_pairs([("AZDIAG_LOG", "azdiag=[bogus"), ("RUST_LOG", "debug")]).unwrap();
        assert_eq!(env_filter(&settings).to_string(), "debug");
    }

    #[test]
    fn test_json_format_flag() {
        let settings = Settings::from_pairs([("AZDIAG_LOG_FORMAT", "JSON")]).unwrap();
        assert!(json_requested(&settings));
        assert!(!json_requested(&Settings::empty()));
    }

    #[test]
    #[serial]
    fn test_logging_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("azdiag.toml");
        std::fs::write(&path, "AZDIAG_LOG = \"azdiag=debug\"\nAZDIAG_LOG_FORMAT = \"json\"\n")
            .unwrap();
        std::env::remove_var("AZDIAG_LOG");
        std::env::remove_var("AZDIAG_LOG_FORMAT");

        let settings = Settings::load_file(&path).unwrap();
        assert_eq!(env_filter(&settings).to_string(), "azdiag=debug");
        assert!(json_requested(&settings));
    }
}
