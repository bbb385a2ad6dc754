//! Walk-through of a host/child session.
//!
//! Run with: cargo run -p handshake-demo
//!
//! Or serve remote children over WebSocket:
//! cargo run -p handshake-demo -- serve https://child.example/frame.html
//!
//! Set `RUST_LOG=debug` to watch the protocol.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use framelink_child::HandshakeResponder;
use framelink_core::{Channel, Model};
use framelink_host::{HostConfig, HostHandle};
use framelink_transport::{MemoryBus, WsPeer, create_ws_router};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HOST_ORIGIN: &str = "https://host.example";
const CHILD_URL: &str = "https://child.example/widget.html";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_local().await,
        [mode, url] if mode == "serve" => serve(url.clone()).await,
        _ => bail!("usage: handshake-demo [serve <child-url>]"),
    }
}

/// Host and child on one in-process bus.
async fn run_local() -> anyhow::Result<()> {
    let config = HostConfig::new(CHILD_URL)
        .with_name("widget")
        .with_model_value("theme", "dark");
    let child_origin = config.child_origin()?;

    let bus = MemoryBus::new();
    let host_ctx = bus.open(HOST_ORIGIN);
    let child_ctx = bus.open(child_origin);

    // The child starts listening as soon as it "loads".
    let model = Model::new()
        .with_value("theme", "light")
        .with_value("title", "Demo widget")
        .with_async_fn("height", |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            json!(480)
        })
        .with_fn("log", |data| {
            tracing::info!(%data, "Child received call");
            Value::Null
        });
    let responder = HandshakeResponder::listen(Arc::new(child_ctx.channel_to(&host_ctx)), model);
    let child_task = tokio::spawn(responder.accept());

    let host = HostHandle::connect(&config, Arc::new(host_ctx.channel_to(&child_ctx))).await?;
    let child = child_task.await.context("child task panicked")??;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    host.on("resized", move |data| {
        let _ = events_tx.send(data);
    });

    tracing::info!(theme = %host.get("theme").await?, "Read theme");
    tracing::info!(title = %host.get("title").await?, "Read title");
    tracing::info!(height = %host.get("height").await?, "Read height");

    host.call("log", json!({ "from": "host" }))?;
    child.emit("resized", json!({ "height": 512 }))?;
    if let Some(data) = events_rx.recv().await {
        tracing::info!(%data, "Host received event");
    }

    host.destroy();
    child.destroy();
    tracing::info!(open_contexts = bus.len(), "Session closed");
    Ok(())
}

/// Accept WebSocket peers and handshake each one as a child.
async fn serve(url: String) -> anyhow::Result<()> {
    let config = Arc::new(HostConfig::new(url));
    config.child_origin()?;

    let (peers_tx, mut peers_rx) = mpsc::unbounded_channel::<WsPeer>();
    let app = create_ws_router(peers_tx);

    tokio::spawn(async move {
        while let Some(peer) = peers_rx.recv().await {
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let origin = peer.origin().to_string();
                let mut socket = peer.subscribe();
                match HostHandle::connect(&config, Arc::new(peer)).await {
                    Ok(host) => {
                        host.on("log", |data| tracing::info!(%data, "Child log"));
                        match host.get("title").await {
                            Ok(title) => tracing::info!(%origin, %title, "Child connected"),
                            Err(e) => tracing::warn!(%origin, "Read failed: {e}"),
                        }
                        // The subscription ends when the socket closes.
                        while socket.next().await.is_some() {}
                        tracing::info!(%origin, "Child disconnected");
                    }
                    Err(e) => tracing::warn!(%origin, "Handshake failed: {e}"),
                }
            });
        }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Listening on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
