// Telemetry - Process-wide tracing subscriber

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

static INIT_GUARD: OnceLock<bool> = OnceLock::new();

/// Install the fmt subscriber once per process
///
/// `RUST_LOG` wins over `default_directive` when set. Returns false if another
/// subscriber was already installed (e.g. by a test harness).
pub fn init_tracing(default_directive: &str) -> bool {
    *INIT_GUARD.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr);

        Registry::default()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .is_ok()
    })
}
