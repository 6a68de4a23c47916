//! Network transports built on the label store.
//!
//! - [`guard`]: asynchronous `tower` service over the store and the evaluator
//! - [`stream`]: TCP label server and client
//! - [`packet`]: IPv4/UDP datagrams carrying a security option
//! - [`raw`]: raw sockets sending and receiving labeled datagrams

pub mod guard;
pub mod packet;
pub mod raw;
pub mod stream;
