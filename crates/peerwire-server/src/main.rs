//! peerwire server endpoint entry point.
//!
//! Wires the configuration, structured logging, the framed session factory,
//! and the server lifecycle together into a headless endpoint:
//!
//! ```text
//! main()
//!  └─ load_config()          -- [node] + [listen] sections
//!  └─ ServerNode::new()      -- registry + lifecycle event channel
//!  └─ connect(listen spec)   -- bind + accept loop
//!       ├─ event pump        -- logs Ready / Destroyed / Error
//!       └─ inbound pump      -- logs peer messages, echoes receptive ones
//! ```
//!
//! Receptive peer messages are echoed back so a peer pointed at a bare
//! endpoint can observe the full send/reply round trip.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peerwire_server::infrastructure::storage::config;
use peerwire_server::{FramedSessionFactory, ServerEvent, ServerNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("loading configuration")?;

    // Initialise structured logging.  The config level is the default; the
    // `RUST_LOG` environment variable overrides it.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.node.log_level.clone())),
        )
        .init();

    info!("peerwire server endpoint {:?} starting", cfg.node.name);

    let spec = cfg.listen.to_spec().context("invalid [listen] configuration")?;
    let (factory, mut inbound) = FramedSessionFactory::new();
    let (node, mut events) = ServerNode::new(cfg.node.name.clone(), Arc::new(factory));

    let addr = node.connect(spec).await.context("starting listener")?;
    info!("listening on {addr}");

    // ── Lifecycle event pump ──────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::Ready { node, addr } => info!("server {node:?} ready on {addr}"),
                ServerEvent::Destroyed { node } => info!("server {node:?} destroyed"),
                ServerEvent::Error { node, error } => {
                    warn!("server {node:?}: socket error: {error}")
                }
            }
        }
    });

    // ── Inbound message pump ──────────────────────────────────────────────────
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            info!(
                "message from {:?} ({} bytes)",
                message.from,
                message.payload.len()
            );
            if let Some(reply) = message.reply {
                // Echo, so a demo peer sees its reply arrive.
                let _ = reply.send(message.payload);
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    if node.disconnect().await {
        info!("listener stopped, sessions disconnected");
    }
    Ok(())
}
