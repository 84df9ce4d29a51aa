// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! One session per connected client: a loop decoding JSON-RPC requests into
//! commands, and an aggregator multiplexing every live command's event
//! stream back onto the client transport.
//!
//! The transport itself stays outside; the session reads incoming text
//! messages from one channel and writes outgoing ones to another, so any
//! duplex message stream can be bridged to it.
//!
//! Each accepted command gets a forwarder task draining its event channel
//! into the shared aggregation channel, so no command can block another.
//! Progress goes out as notifications: `Event` for named events, `Error` for
//! a failure, and a final `Ended` once the command's channel closes.

use crate::cmd::{CmdEvent, Command};
use crate::proxy::Proxy;
use crate::rpc::{Id, Notification, Request, Response, RpcError};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "call-api-session";

/// The error code used for every rejected client request.
pub const ERROR_CODE: i64 = 32000;

// One progress step of one command; `event: None` is the terminator.
struct CmdProgress {
    cmd_id: String,
    event: Option<CmdEvent>,
}

/// A client session, bound to its own [`Proxy`].
pub struct Session {
    proxy: Arc<Proxy>,
}

impl Session {
    /// Build a session around the proxy facade dedicated to this client.
    pub fn new(proxy: Proxy) -> Session {
        Session {
            proxy: Arc::new(proxy),
        }
    }

    /// Serve the client until `incoming` closes. Outgoing responses and
    /// notifications are pushed to `outgoing`; the call returns once every
    /// pending notification has been flushed.
    pub async fn run(self, mut incoming: mpsc::Receiver<String>, outgoing: mpsc::Sender<String>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        let aggregator = tokio::spawn(aggregate(events_rx, outgoing.clone()));

        while let Some(text) = incoming.recv().await {
            self.handle_request(&text, &events_tx, &outgoing).await;
        }

        // No more requests; once the last live command terminates the
        // aggregator runs out of senders and drains.
        drop(events_tx);
        let _ = aggregator.await;
        tracing::debug!(target: LOG_TARGET, "session closed");
    }

    async fn handle_request(
        &self,
        text: &str,
        events: &mpsc::Sender<CmdProgress>,
        outgoing: &mpsc::Sender<String>,
    ) {
        let request: Request = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, "unparseable request: {e}");
                let id = Id::String(String::new());
                return reply_error(outgoing, id, "failed to parse JSON-RPC request").await;
            }
        };
        let id = request.id;

        let Some(Value::Object(mut params)) = request.params else {
            return reply_error(outgoing, id, "non-object parameters are not accepted").await;
        };
        let cmd_id = match params.remove("cmd_id") {
            None => None,
            Some(Value::String(cmd_id)) => Some(cmd_id),
            Some(_) => return reply_error(outgoing, id, "bad JSON-RPC parameters").await,
        };

        let mut command = match Command::new(&request.method, cmd_id, Arc::clone(&self.proxy)) {
            Ok(command) => command,
            Err(e) => return reply_error(outgoing, id, &e.to_string()).await,
        };
        let mut cmd_events = command.take_events();
        if let Err(e) = command.run(params) {
            return reply_error(outgoing, id, &e.to_string()).await;
        }
        tracing::debug!(
            target: LOG_TARGET,
            cmd = %command.id(),
            method = %command.method(),
            "command started",
        );

        // Acknowledge before wiring the forwarder up, so no notification can
        // overtake the acceptance reply.
        let result = json!({ "status": "Started", "cmd_id": command.id() });
        send(outgoing, &Response::result(id, result)).await;

        // Forward this command's events into the shared aggregation channel,
        // terminator last.
        let cmd_id = command.id().to_owned();
        let events = events.clone();
        tokio::spawn(async move {
            while let Some(event) = cmd_events.recv().await {
                let progress = CmdProgress {
                    cmd_id: cmd_id.clone(),
                    event: Some(event),
                };
                if events.send(progress).await.is_err() {
                    return;
                }
            }
            let _ = events
                .send(CmdProgress {
                    cmd_id,
                    event: None,
                })
                .await;
        });
    }
}

async fn aggregate(mut events: mpsc::Receiver<CmdProgress>, outgoing: mpsc::Sender<String>) {
    while let Some(progress) = events.recv().await {
        let notification = match progress.event {
            Some(CmdEvent::Event { name, params }) => {
                let mut data = json!({ "event": name });
                if let Some(params) = params {
                    data["params"] = params;
                }
                Notification::new("Event", json!({ "cmd_id": progress.cmd_id, "data": data }))
            }
            Some(CmdEvent::Error(e)) => Notification::new(
                "Error",
                json!({ "cmd_id": progress.cmd_id, "error_msg": e.to_string() }),
            ),
            None => Notification::new("Ended", json!({ "cmd_id": progress.cmd_id })),
        };
        match serde_json::to_string(&notification) {
            Ok(text) => {
                if outgoing.send(text).await.is_err() {
                    // Client transport gone; drop the rest on the floor.
                    break;
                }
            }
            Err(e) => {
                tracing::error!(target: LOG_TARGET, "could not serialize notification: {e}");
            }
        }
    }
}

async fn reply_error(outgoing: &mpsc::Sender<String>, id: Id, message: &str) {
    tracing::debug!(target: LOG_TARGET, "rejecting request: {message}");
    send(outgoing, &Response::error(id, RpcError::new(ERROR_CODE, message))).await;
}

async fn send(outgoing: &mpsc::Sender<String>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(text) => {
            if outgoing.send(text).await.is_err() {
                tracing::debug!(target: LOG_TARGET, "client transport closed");
            }
        }
        Err(e) => {
            tracing::error!(target: LOG_TARGET, "could not serialize response: {e}");
        }
    }
}
