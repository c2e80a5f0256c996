//! Tracing subscriber setup.
//!
//! Filter precedence: `RUST_LOG`, then `SWITCHBOARD_LOG`, then
//! [`DEFAULT_FILTER`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,switchboard_client=debug";

/// Install a global fmt subscriber. Safe to call more than once; only the
/// first call has an effect.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter_from_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn filter_from_env() -> EnvFilter {
    filter_from(
        std::env::var("RUST_LOG").ok(),
        std::env::var("SWITCHBOARD_LOG").ok(),
    )
}

fn filter_from(rust_log: Option<String>, app_log: Option<String>) -> EnvFilter {
    [rust_log, app_log]
        .into_iter()
        .flatten()
        .filter(|directives| !directives.trim().is_empty())
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn rust_log_wins() {
        let filter = filter_from(Some("warn".into()), Some("trace".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn app_variable_then_default() {
        let filter = filter_from(None, Some("error".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));

        let filter = filter_from(Some(" ".into()), None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
