//! Labeled datagram sender.
//!
//! Builds an IPv4/UDP packet whose security option carries the given label
//! and sends it through a raw socket.
//!
//! # Usage
//! ```bash
//! sudo cargo run --bin mac-sender -- 127.0.0.1 8888 2:5
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::Context;
use clap::Parser;
use maclabel_core::{
    config::MacArgs,
    label::Label,
    transport::{
        packet::LabeledDatagram,
        raw::{DEFAULT_PACKET_LABEL, DEFAULT_PACKET_PORT, DEFAULT_SOURCE_PORT, RawSender},
    },
};
use maclabel_demos::{bootstrap::bootstrap, logging::init_tracing_for_node};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mac-sender", about = "Send one labeled UDP datagram over a raw socket")]
struct Args {
    /// Destination address
    #[arg(default_value = "127.0.0.1")]
    destination: Ipv4Addr,

    /// Destination port
    #[arg(default_value_t = DEFAULT_PACKET_PORT)]
    port: u16,

    /// Label carried by the datagram
    #[arg(default_value = DEFAULT_PACKET_LABEL)]
    label: Label,

    /// Source address written in the IPv4 header
    #[arg(long, default_value = "127.0.0.1")]
    source: Ipv4Addr,

    #[command(flatten)]
    mac: MacArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing_for_node("mac-sender");

    let store = args.mac.build_store();
    bootstrap(&store, None)?;

    let mut sender = RawSender::open(&store).context("opening the raw socket")?;
    let payload = format!("Test packet labeled {} (level {})", args.label, args.label.level());
    let datagram = LabeledDatagram::new(
        SocketAddrV4::new(args.source, DEFAULT_SOURCE_PORT),
        SocketAddrV4::new(args.destination, args.port),
        payload.clone(),
    )
    .with_identification(std::process::id() as u16)
    .with_label(args.label.clone());

    let (packet, sent) = sender.send(&store, &datagram).context("sending the datagram")?;
    info!(sent, label = %args.label, %payload, "[sender] done");
    store.release_object(packet);
    sender.close(&store);
    Ok(())
}
