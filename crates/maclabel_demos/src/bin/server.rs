//! Label server: accepts TCP clients whose label it dominates.
//!
//! Each client announces its label on the first line of the connection. The
//! server binds it to the connection and checks read access of its own label
//! on it before accepting a message.
//!
//! # Usage
//! ```bash
//! cargo run --bin mac-server -- --label 3:1,2
//! ```

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use maclabel_core::{
    access::FailPolicy,
    capability::CapabilitySet,
    config::MacArgs,
    label::Label,
    store::{DynLabelStore, SubjectContext},
    transport::{
        guard::{MacGuard, with_timeout},
        stream::{DEFAULT_SERVER_PORT, LabelServer},
    },
};
use maclabel_demos::{bootstrap::bootstrap, logging::init_tracing_for_node};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mac-server", about = "TCP server enforcing read access on labeled clients")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_SERVER_PORT)]
    port: u16,

    /// Label applied to the server process at startup
    #[arg(short, long)]
    label: Option<Label>,

    /// Accept clients whose label cannot be resolved
    #[arg(long)]
    fail_open: bool,

    /// Timeout of each label store operation, in milliseconds
    #[arg(long, default_value_t = 500)]
    guard_timeout_ms: u64,

    #[command(flatten)]
    mac: MacArgs,
}

/// Binds the listener, with `PRIV_SOCK` raised for privileged ports only.
fn bind_listener(store: &DynLabelStore, address: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = if address.port() < 1024 {
        store
            .gate()
            .with_elevated(CapabilitySet::PRIV_SOCK, || std::net::TcpListener::bind(address))??
    } else {
        std::net::TcpListener::bind(address)?
    };
    listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(listener)?)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing_for_node("mac-server");

    let store = Arc::new(args.mac.build_store());
    // Before the runtime exists, so that its workers start unprivileged
    let context = bootstrap(&store, args.label.as_ref())?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the runtime")?
        .block_on(serve(args, store, context))
}

async fn serve(args: Args, store: Arc<DynLabelStore>, context: SubjectContext) -> anyhow::Result<()> {
    let address = SocketAddr::new(args.bind, args.port);
    let listener =
        bind_listener(&store, address).with_context(|| format!("listening on {address}"))?;
    info!(%address, "[server] listening");

    let guard =
        with_timeout(MacGuard::from_shared(store), Duration::from_millis(args.guard_timeout_ms));
    let policy = if args.fail_open { FailPolicy::Open } else { FailPolicy::Closed };
    LabelServer::new(guard, context)
        .with_fail_policy(policy)
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("[server] stopped");
    Ok(())
}
