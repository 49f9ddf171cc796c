//! Startup helpers for the service binary.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "USER_SERVICE_LOG";

/// Set to `json` for one JSON object per log line.
pub const LOG_FORMAT_ENV_VAR: &str = "USER_SERVICE_LOG_FORMAT";

/// Initialize tracing with the USER_SERVICE_LOG environment variable.
///
/// Defaults to "info" level if USER_SERVICE_LOG is not set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Config file path from `--config <path>` or `--config=<path>`, if given.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(mut args: impl Iterator<Item = String>) -> Option<String> {
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

/// Run `connect` until it succeeds, backing off between attempts.
///
/// Returns the last error once the attempts are exhausted.
pub async fn connect_with_retry<T, E, F, Fut>(service_name: &str, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let result = connect
        .retry(connection_backoff())
        .notify(|e: &E, delay: Duration| {
            warn!(
                service = %service_name,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Connection failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => tracing::info!(service = %service_name, "Connected"),
        Err(e) => tracing::error!(service = %service_name, error = %e, "Giving up on connection"),
    }
    result
}
