//! Logging initialization
//!
//! Console logging via tracing-subscriber with an environment-driven
//! filter. Verbose dependency targets are suppressed below trace level so
//! sqlx and reqwest internals do not drown out the harvest log.

use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initialize console logging. `RUST_LOG` overrides the given level.
///
/// Safe to call once per process; later calls fail silently when a global
/// subscriber is already installed, which keeps test setups simple.
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(level);
        if !level.eq_ignore_ascii_case("trace") {
            for directive in [
                "sqlx::query=warn",
                "sqlx::sqlite=warn",
                "reqwest=info",
                "hyper=warn",
                "h2=warn",
            ] {
                if let Ok(parsed) = directive.parse() {
                    filter = filter.add_directive(parsed);
                }
            }
        }
        filter
    });

    let console_layer = fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_target(false);

    let _ = Registry::default()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
