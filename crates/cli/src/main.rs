//! peerlink-sim: negotiate a connection between two simulated nodes
//!
//! Both nodes sit on one in-process signaling hub. Each is given an external
//! address, or none when it should behave as if it were behind NAT. The
//! simulator lets them exchange presence and reports which side dialled.

use anyhow::{Context, Result};
use clap::Parser;
use peerlink_presence_core::logging::{LoggingConfig, log_welcome, parse_log_level, setup_logging};
use peerlink_presence_core::loopback::{
    LoopbackHub, LoopbackIdentity, LoopbackPlugin, LoopbackSources, LoopbackTransport,
};
use peerlink_presence_core::{
    AddressComparison, HandlerEvent, SignalingConfig, SignalingHandler, SignalingHandlerBuilder,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "peerlink-sim")]
#[command(about = "Simulate presence negotiation between two peerlink nodes")]
struct Args {
    /// External address of the first node; omit to simulate NAT
    #[arg(long)]
    alice_address: Option<String>,

    #[arg(long, default_value = "50210")]
    alice_port: u16,

    /// External address of the second node; omit to simulate NAT
    #[arg(long)]
    bob_address: Option<String>,

    #[arg(long, default_value = "50211")]
    bob_port: u16,

    /// TOML file with handler settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compare addresses canonically instead of literally
    #[arg(long)]
    canonical: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

struct SimNode {
    name: &'static str,
    handler: SignalingHandler,
    transport: Arc<LoopbackTransport>,
    plugin: Arc<LoopbackPlugin>,
}

impl SimNode {
    fn start(
        hub: &LoopbackHub,
        name: &'static str,
        address: Option<String>,
        port: u16,
        config: SignalingConfig,
    ) -> Result<Self> {
        let transport = Arc::new(match address {
            Some(address) => LoopbackTransport::new(address, port),
            None => LoopbackTransport::unreachable(),
        });

        let handler = SignalingHandlerBuilder::new()
            .config(config)
            .transport(transport.clone())
            .identity(Arc::new(LoopbackIdentity::new(format!("{}-node", name))))
            .sources(Arc::new(LoopbackSources::new()))
            .build()
            .with_context(|| format!("Failed to start node {}", name))?;

        let plugin = Arc::new(LoopbackPlugin::new(
            hub,
            format!("{}-loopback", name),
            name,
            format!("{}@peerlink.local/sim", name),
        ));

        Ok(Self {
            name,
            handler,
            transport,
            plugin,
        })
    }
}

fn load_config(args: &Args) -> Result<SignalingConfig> {
    let config = match &args.config {
        Some(path) => SignalingConfig::from_file(path)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?,
        None => SignalingConfig::default(),
    };

    Ok(if args.canonical {
        config.with_address_comparison(AddressComparison::Canonical)
    } else {
        config
    })
}

async fn settle(nodes: &[&SimNode]) -> Result<()> {
    for _ in 0..4 {
        for node in nodes {
            node.handler.flush().await?;
        }
    }
    Ok(())
}

fn report(dialer: &SimNode, listener: &SimNode) -> usize {
    let requests = dialer.transport.connect_requests();
    for request in &requests {
        println!(
            "{} -> {}: connect to {}:{} with key {}",
            dialer.name, listener.name, request.host, request.port, request.key
        );
    }
    requests.len()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    let mut logging = LoggingConfig::new(level, "peerlink-sim");
    if args.json {
        logging = logging.with_json();
    }
    setup_logging(&logging)?;
    log_welcome(&logging, env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!("Address comparison: {:?}", config.address_comparison);

    let hub = LoopbackHub::new();
    let alice = SimNode::start(&hub, "alice", args.alice_address.clone(), args.alice_port, config.clone())?;
    let bob = SimNode::start(&hub, "bob", args.bob_address.clone(), args.bob_port, config)?;
    let mut events = alice.handler.event_receiver();

    alice.handler.add_plugin(alice.plugin.clone()).await?;
    bob.handler.add_plugin(bob.plugin.clone()).await?;
    settle(&[&alice, &bob]).await?;

    while let Ok(event) = events.try_recv() {
        if let HandlerEvent::OfferRegistered { peer_id, key } = event {
            info!("alice offered {} key {}", peer_id, key);
        }
    }

    let dialled = report(&alice, &bob) + report(&bob, &alice);

    // Hand each dialled key to the listening side, as the transport would on
    // an inbound connection
    for (dialer, listener) in [(&alice, &bob), (&bob, &alice)] {
        for request in dialer.transport.connect_requests() {
            match listener.handler.claim_offer(&request.key).await? {
                Some(pending) => println!(
                    "{} accepted {} as \"{}\"",
                    listener.name, pending.peer_id, pending.name
                ),
                None => warn!("{} has no offer for key {}", listener.name, request.key),
            }
        }
    }

    if dialled == 0 {
        println!("no connection: neither node is externally reachable");
    }

    alice.handler.shutdown().await?;
    bob.handler.shutdown().await?;
    Ok(())
}
