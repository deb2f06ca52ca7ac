use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Env var holding the log filter; `RUST_LOG` is read when it is unset.
pub const LOG_ENV: &str = "KATANA_LOG";

/// Install the stderr subscriber. Stdout stays reserved for command output.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}
