//! maclabel demos - shared utilities
//!
//! Common setup of the demonstration binaries: structured logging and the
//! process bootstrap (initial label, then an empty effective capability set).

pub mod bootstrap;
pub mod logging;
