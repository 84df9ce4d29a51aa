// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The gateway binary: accepts JSON-RPC over WebSocket and runs one
//! [`Session`] per connection against the configured SIP proxy.

mod logging;

use call_api::{Config, Proxy, Session};
use clap::Parser as ClapParser;
use color_eyre::eyre::WrapErr;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

const LOG_TARGET: &str = "call-api";

/// The JSON-RPC gateway to a SIP proxy's calling operations.
#[derive(Debug, ClapParser)]
#[command(name = "call-api", version)]
struct Opts {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let opts = Opts::parse();
    let config = Config::load(opts.config.as_deref(), "call-api")?;
    logging::init(&config.log)?;

    let listen = format!("{}:{}", config.ws_server.host, config.ws_server.port);
    let listener = TcpListener::bind(&listen)
        .await
        .wrap_err_with(|| format!("cannot listen on {listen}"))?;
    tracing::info!(
        target: LOG_TARGET,
        "listening for JSON-RPC over WebSocket on ws://{listen}{} ...",
        config.ws_server.http_path,
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: LOG_TARGET, "interrupted, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.wrap_err("accept failed")?;
                tokio::spawn(serve_connection(config.clone(), stream, peer));
            }
        }
    }
    Ok(())
}

async fn serve_connection(config: Config, stream: TcpStream, peer: SocketAddr) {
    // Only upgrade requests for the configured path.
    let http_path = config.ws_server.http_path.clone();
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == http_path {
            Ok(response)
        } else {
            let mut reject = ErrorResponse::new(None);
            *reject.status_mut() = StatusCode::NOT_FOUND;
            Err(reject)
        }
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, %peer, "upgrade failed: {e}");
            return;
        }
    };
    tracing::debug!(target: LOG_TARGET, %peer, "upgraded to WebSocket");

    // Each client gets its own facade; losing the proxy only costs this
    // connection.
    let proxy = match Proxy::new(&config).await {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::error!(target: LOG_TARGET, %peer, "could not reach the SIP proxy: {e}");
            return;
        }
    };

    let (incoming_tx, incoming_rx) = mpsc::channel::<String>(16);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(16);
    let session = tokio::spawn(Session::new(proxy).run(incoming_rx, outgoing_tx));

    let (mut ws_tx, mut ws_rx) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = outgoing_rx.recv().await {
            tracing::trace!(target: LOG_TARGET, "send: {text}");
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                tracing::trace!(target: LOG_TARGET, "recv: {}", text.as_str());
                if incoming_tx.send(text.as_str().to_owned()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite itself.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, %peer, "read failed: {e}");
                break;
            }
        }
    }

    drop(incoming_tx);
    let _ = session.await;
    let _ = writer.await;
    tracing::debug!(target: LOG_TARGET, %peer, "connection closed");
}
