// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use meshsub_core::{
    AlwaysRequireSignature, AuthMethod, Client, ClientConfig, ClientEvent, ResendOption,
    StaticTokenProvider, VerifyMode,
};

/// Subscribe to one stream partition and print deliveries as they arrive.
#[derive(Parser)]
#[command(name = "meshsub-cli", version, about = "Stream subscription client.")]
struct Cli {
    /// Broker websocket URL, e.g. wss://broker.example/v2.
    #[arg(long, env = "MESHSUB_URL")]
    url: String,

    /// Stream id to subscribe to.
    #[arg(long)]
    stream: String,

    /// Stream partition.
    #[arg(long, default_value_t = 0)]
    partition: u32,

    /// Pre-acquired session token (other auth methods require an embedding
    /// application supplying a custom `TokenProvider`).
    #[arg(long, env = "MESHSUB_SESSION_TOKEN")]
    session_token: String,

    /// Resend the last N messages before switching to realtime delivery.
    #[arg(long)]
    resend_last: Option<u64>,

    /// `never`, `auto`, or `always`.
    #[arg(long, default_value = "auto")]
    verify_signatures: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // tokio-tungstenite's rustls backend needs a process-level crypto
    // provider installed before the first TLS handshake.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = run(Cli::parse()).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let verify_signatures = VerifyMode::parse(&cli.verify_signatures)?;

    let mut config = ClientConfig::new(AuthMethod::SessionToken(cli.session_token));
    config.verify_signatures = verify_signatures;

    let (client, mut errors) =
        Client::spawn(cli.url, config, Arc::new(StaticTokenProvider), Arc::new(AlwaysRequireSignature));

    client.connect().await?;
    info!(stream = %cli.stream, partition = cli.partition, "connected");

    let resend = cli.resend_last.map(|n| ResendOption::Last { n });
    let mut handle = client.subscribe(cli.stream, cli.partition, resend).await?;

    loop {
        tokio::select! {
            delivery = handle.deliveries.recv() => {
                let Some(delivery) = delivery else { break };
                let json = serde_json::to_string(&delivery.message)?;
                println!("{json}");
            }
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                info!(?event, "subscription event");
            }
            event = errors.recv() => {
                match event {
                    Ok(ClientEvent::Error(err)) => error!(%err, "client error"),
                    Err(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    let _ = client.unsubscribe(&handle).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.shutdown();
    Ok(())
}
