//! Diagnostic tracing.
//!
//! Tracing output goes to stderr and is filtered by `RUST_LOG`. It is never
//! part of the ledger, which is the only durable record of a task.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a compact stderr subscriber. Defaults to `warn` if `RUST_LOG` is unset.
///
/// # Example
/// ```bash
/// RUST_LOG=gatekeeper=debug cargo test --test orchestrator_lifecycle
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
