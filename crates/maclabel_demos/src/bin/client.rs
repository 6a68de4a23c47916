//! Label client: announces the label of this process and sends one message.
//!
//! # Usage
//! ```bash
//! cargo run --bin mac-client -- 127.0.0.1 9001 2:1 "hello"
//! ```

use std::net::IpAddr;

use anyhow::Context;
use clap::Parser;
use maclabel_core::{
    config::MacArgs,
    error::TransportError,
    label::Label,
    transport::stream::{DEFAULT_CLIENT_MESSAGE, DEFAULT_SERVER_PORT, exchange},
};
use maclabel_demos::{bootstrap::bootstrap, logging::init_tracing_for_node};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mac-client", about = "Send a message to a label server")]
struct Args {
    /// Server address
    #[arg(default_value = "127.0.0.1")]
    server: IpAddr,

    /// Server port
    #[arg(default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Label applied to this process and announced to the server
    label: Option<Label>,

    /// Message delivered once access is granted
    #[arg(default_value = DEFAULT_CLIENT_MESSAGE)]
    message: String,

    #[command(flatten)]
    mac: MacArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing_for_node("mac-client");

    let store = args.mac.build_store();
    // Before the runtime exists, so that its workers start unprivileged
    let context = bootstrap(&store, args.label.as_ref())?;
    let label = store.get_subject_label(&context).ok();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the runtime")?
        .block_on(deliver(&args, label.as_ref()))
}

async fn deliver(args: &Args, label: Option<&Label>) -> anyhow::Result<()> {
    info!(server = %args.server, port = args.port, message = %args.message, "[client] connecting");
    match exchange((args.server, args.port), label, &args.message).await {
        Ok(report) => {
            info!(label = %report.reported_label, "[client] server answer");
            info!(acknowledgement = %report.acknowledgement, "[client] message delivered");
            Ok(())
        }
        Err(TransportError::Refused(reason)) => {
            warn!(%reason, "[client] access refused by the server");
            Err(TransportError::Refused(reason).into())
        }
        Err(e) => Err(e).context("exchanging with the server"),
    }
}
