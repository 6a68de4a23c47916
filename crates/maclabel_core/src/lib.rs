//! Mandatory access control labels for processes, sockets and packets.
//!
//! This crate models multi-level security labels (a sensitivity level plus a
//! set of compartment categories), binds them to subjects and objects, and
//! decides whether a subject may read or write an object under the dominance
//! relation.
//!
//! - [`label`]: the label value type and its canonical text codec
//! - [`store`]: subject and object bindings over a pluggable backend
//! - [`access`]: the access evaluator
//! - [`capability`]: scoped elevation of the privileges needed to relabel
//! - [`transport`]: labeled TCP streams and labeled IPv4/UDP datagrams
//! - [`config`]: command line configuration shared by the binaries
//!
//! All label store mutations go through the capability gate: the process runs
//! with an empty effective set and raises the exact capability it needs for
//! the duration of a single operation.

#[cfg(test)]
mod tests;

pub mod access;
pub mod capability;
pub mod config;
pub mod error;
pub mod label;
pub mod store;
pub mod transport;

pub mod maclabel_tracing {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize tracing for tests
    /// Output is captured per test and filtered through `RUST_LOG` (off by default).
    pub fn init() {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));

            // Another subscriber may already be installed by the embedding binary
            let _ = fmt().with_target(false).with_test_writer().with_env_filter(filter).try_init();
        });
    }
}
