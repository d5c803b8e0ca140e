//! Natgate runner
//!
//! Opens gateway mappings for the listen addresses given on the command line,
//! prints the external addresses, and removes the mappings on Ctrl-C.
//!
//! ```text
//! natgate [--config nat.json] /ip4/0.0.0.0/tcp/4001 [...]
//! ```

use anyhow::{bail, Context};
use natgate::{AddressManager, Multiaddr, NatManager, NatOptions, TransportManager};
use std::sync::Arc;
use tracing::info;

struct StaticListeners(Vec<Multiaddr>);

impl TransportManager for StaticListeners {
    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.0.clone()
    }
}

struct StdoutAddresses;

impl AddressManager for StdoutAddresses {
    fn add_observed_address(&self, addr: Multiaddr) {
        println!("{}", addr);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    natgate::init();

    let mut config_path = None;
    let mut listen = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(args.next().context("--config needs a path")?);
        } else {
            listen.push(
                arg.parse::<Multiaddr>()
                    .with_context(|| format!("invalid listen address {}", arg))?,
            );
        }
    }

    if listen.is_empty() {
        bail!("usage: natgate [--config nat.json] <listen-addr>...");
    }

    let mut options = match &config_path {
        Some(path) => NatOptions::load(path).with_context(|| format!("loading {}", path))?,
        None => NatOptions::default(),
    };
    // Running the tool is the opt-in
    options.enabled = true;

    let node_id = format!("natgate-{}", std::process::id());
    let nat = NatManager::new(
        &node_id,
        Arc::new(StaticListeners(listen)),
        Arc::new(StdoutAddresses),
        options,
    )?;

    nat.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    nat.stop().await;

    Ok(())
}
