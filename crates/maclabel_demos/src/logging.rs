//! Structured logging setup for the demos
//!
//! Every event carries the name of the program that emitted it, which keeps
//! interleaved server and client output readable.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "maclabel_core=info,maclabel_demos=info,mac_server=info,mac_client=info,mac_sender=info,mac_receiver=info";

/// Initialize tracing for the demo program `node_id`
///
/// This sets up a tracing subscriber with:
/// - Colored output for terminal readability
/// - Env filter from RUST_LOG (defaults to info for the maclabel crates)
/// - Pretty formatting
pub fn init_tracing_for_node(node_id: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .compact()
                    .with_target(true)
                    .with_thread_ids(false)
                    .pretty(),
            )
            .init();

        tracing::info!(node_id = %node_id, "=== Program initialized ===");
    });
}
