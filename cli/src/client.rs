// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A small command-line client for the gateway: send one command, print
//! every notification it produces, leave once it has ended.

mod logging;

use call_api::Config;
use call_api::rpc::{Id, Notification, Request};
use clap::Parser as ClapParser;
use color_eyre::eyre::{WrapErr, eyre};
use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;

const LOG_TARGET: &str = "call-api-client";

/// Issue one command against a call-api gateway and follow its progress.
#[derive(Debug, ClapParser)]
#[command(name = "call-api-client", version)]
struct Opts {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The gateway host to connect to; the port and path come from the
    /// configuration.
    #[arg(long)]
    server: Option<String>,

    /// The command to run, e.g. `CallStart`.
    #[arg(long)]
    method: String,

    /// The command parameters, as a JSON object.
    #[arg(long)]
    params: Option<String>,

    /// The JSON-RPC request id; defaults to an empty string.
    #[arg(long, default_value = "")]
    id: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let opts = Opts::parse();
    let config = Config::load(opts.config.as_deref(), "call-api")?;
    logging::init(&config.log)?;

    let params = match &opts.params {
        Some(text) => {
            Some(serde_json::from_str(text).wrap_err("failed to parse JSON params")?)
        }
        None => None,
    };
    let request = Request::new(Id::String(opts.id.clone()), opts.method.clone(), params);
    let text = serde_json::to_string(&request)?;

    let host = opts.server.as_deref().unwrap_or(&config.ws_server.host);
    let url = format!(
        "ws://{host}:{}{}",
        config.ws_server.port, config.ws_server.http_path,
    );
    tracing::info!(target: LOG_TARGET, "connecting to {url}");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .wrap_err_with(|| format!("cannot connect to {url}"))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    tracing::info!(target: LOG_TARGET, "send: {text}");
    ws_tx.send(Message::text(text)).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: LOG_TARGET, "interrupted");
                close(&mut ws_tx).await;
                break;
            }
            frame = ws_rx.next() => {
                let Some(frame) = frame else {
                    return Err(eyre!("connection closed by the gateway"));
                };
                match frame? {
                    Message::Text(text) => {
                        println!("{}", text.as_str());
                        if finished(text.as_str()) {
                            close(&mut ws_tx).await;
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    // Wait briefly for the close handshake to come back.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while let Some(frame) = ws_rx.next().await {
            if frame.is_err() || matches!(frame, Ok(Message::Close(_))) {
                break;
            }
        }
    })
    .await;
    Ok(())
}

// The command is done once its terminator notification shows up.
fn finished(text: &str) -> bool {
    let Ok(notification) = serde_json::from_str::<Notification>(text) else {
        return false;
    };
    matches!(notification.method.as_str(), "Ended" | "Error")
}

async fn close<S>(ws_tx: &mut S)
where
    S: SinkExt<Message> + Unpin,
{
    tracing::info!(target: LOG_TARGET, "gracefully closing connection...");
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(frame))).await;
}
