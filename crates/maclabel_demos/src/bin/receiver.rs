//! Labeled datagram receiver.
//!
//! Listens on a raw UDP socket, recovers the label of each datagram addressed
//! to the port and checks read access of this process on it. Payloads are
//! only shown for permitted datagrams.
//!
//! # Usage
//! ```bash
//! sudo cargo run --bin mac-receiver -- 8888 --label 2:5
//! ```

use anyhow::Context;
use clap::Parser;
use maclabel_core::{
    access::{self, AccessMode, FailPolicy},
    config::MacArgs,
    label::Label,
    transport::raw::{DEFAULT_PACKET_PORT, RawReceiver},
};
use maclabel_demos::{bootstrap::bootstrap, logging::init_tracing_for_node};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mac-receiver", about = "Receive labeled UDP datagrams on a raw socket")]
struct Args {
    /// Port to watch
    #[arg(default_value_t = DEFAULT_PACKET_PORT)]
    port: u16,

    /// Label applied to the receiving process at startup
    #[arg(long)]
    label: Option<Label>,

    /// Stop after this many datagrams
    #[arg(long)]
    count: Option<u64>,

    #[command(flatten)]
    mac: MacArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing_for_node("mac-receiver");

    let store = args.mac.build_store();
    let context = bootstrap(&store, args.label.as_ref())?;

    let mut receiver = RawReceiver::open(&store, args.port).context("opening the raw socket")?;
    info!(port = receiver.port(), "[receiver] waiting for labeled datagrams");

    let mut received = 0u64;
    while args.count.is_none_or(|limit| received < limit) {
        let (handle, datagram) = receiver.receive(&store)?;
        received += 1;

        let subject = store.get_subject_label(&context);
        let object = store.get_object_label(handle);
        let decision = access::evaluate(subject.as_ref(), object.as_ref(), AccessMode::Read);
        info!(
            packet = received,
            source = %datagram.source,
            destination = %datagram.destination,
            label = %object.as_ref().map_or_else(|_| "unlabeled".to_string(), ToString::to_string),
            %decision,
            "[receiver] datagram"
        );
        if decision.is_granted(FailPolicy::Closed) {
            info!(payload = %String::from_utf8_lossy(&datagram.payload), "[receiver] delivered");
        } else {
            warn!(bytes = datagram.payload.len(), "[receiver] payload withheld");
        }
        store.release_object(handle);
    }
    Ok(())
}
