// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The command engine: a registry of named commands and the per-invocation
//! machinery that runs one of them and streams its progress events.
//!
//! A [`Command`] is built from a method name, an optional externally supplied
//! id and a [`Proxy`]. Running it schedules the matching handler on its own
//! task; the handler drives the SIP proxy through the command's
//! [`CmdContext`] and emits events into a small buffered channel the session
//! drains via [`Command::take_events`]. Closing that channel is the end
//! signal; an error event always closes it.

mod call_attended_transfer;
mod call_blind_transfer;
mod call_end;
mod call_hold;
mod call_start;
mod event;

pub use event::{CmdEvent, RESERVED_EVENTS};

use crate::mi::MiError;
use crate::proxy::Proxy;
use crate::rpc::{AttrError, RpcError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

const LOG_TARGET: &str = "call-api-cmd";

/// Command parameters; attribute values are restricted to strings.
pub type CmdParams = HashMap<String, String>;

/// Why a command could not be built, run, or finish.
#[derive(Debug, thiserror::Error)]
pub enum CmdError {
    /// No handler is registered under the requested method name.
    #[error("unknown JSON-RPC method")]
    UnknownMethod,
    /// A parameter value was not a string.
    #[error("bad JSON-RPC parameters")]
    BadParams,
    /// A required parameter is absent.
    #[error("{0} not specified")]
    MissingParam(&'static str),
    /// The remote event subscription could not be established.
    #[error("Could not subscribe for event")]
    SubscribeFailed,
    /// The management-interface call itself failed.
    #[error(transparent)]
    Mi(#[from] MiError),
    /// The proxy answered with a JSON-RPC error.
    #[error(transparent)]
    Remote(#[from] RpcError),
    /// An event notification was missing an attribute the state machine
    /// needs.
    #[error(transparent)]
    BadEvent(#[from] AttrError),
    /// The state machine reported failure.
    #[error("{0}")]
    Failed(String),
}

/// What a handler needs from its command invocation: its id, the proxy, and
/// the channel progress events go out on.
pub struct CmdContext {
    id: String,
    proxy: Arc<Proxy>,
    // Taken on the first terminal notification, so nothing can follow it.
    events: std::sync::Mutex<Option<mpsc::Sender<CmdEvent>>>,
}

impl CmdContext {
    /// The command invocation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The proxy this command drives.
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Emit a named progress event.
    ///
    /// # Panics
    ///
    /// Panics if `name` is one of [`RESERVED_EVENTS`].
    pub async fn notify_event(&self, name: &str, params: Option<Value>) {
        let cmd_event = CmdEvent::named(name, params);
        let sender = self.events.lock().expect("events lock poisoned").clone();
        let Some(sender) = sender else {
            tracing::warn!(
                target: LOG_TARGET,
                cmd = %self.id,
                "event after termination dropped: {cmd_event}",
            );
            return;
        };
        if sender.send(cmd_event).await.is_err() {
            tracing::trace!(target: LOG_TARGET, cmd = %self.id, "session stopped listening");
        }
    }

    /// Emit an error and terminate the command. Any event emitted after this
    /// is dropped.
    pub async fn notify_error(&self, err: impl Into<CmdError>) {
        let sender = self.events.lock().expect("events lock poisoned").take();
        let Some(sender) = sender else {
            return;
        };
        if sender.send(CmdEvent::Error(err.into())).await.is_err() {
            tracing::trace!(target: LOG_TARGET, cmd = %self.id, "session stopped listening");
        }
    }

    /// Terminate the command without a further event.
    pub async fn notify_end(&self) {
        drop(self.events.lock().expect("events lock poisoned").take());
    }
}

/// A handler drives one invocation of its command to completion.
#[async_trait::async_trait]
trait CommandHandler: Send {
    async fn run(self: Box<Self>, ctx: Arc<CmdContext>, params: CmdParams);
}

type HandlerCtor = fn() -> Box<dyn CommandHandler>;

// Method names are case-sensitive and match the client-facing API.
fn handler_for(method: &str) -> Option<HandlerCtor> {
    let ctor: HandlerCtor = match method {
        "CallStart" => || Box::new(call_start::CallStart),
        "CallEnd" => || Box::new(call_end::CallEnd),
        "CallBlindTransfer" => || Box::new(call_blind_transfer::CallBlindTransfer),
        "CallAttendedTransfer" => || Box::new(call_attended_transfer::CallAttendedTransfer),
        "CallHold" => || Box::new(call_hold::CallHold { hold: true }),
        "CallUnhold" => || Box::new(call_hold::CallHold { hold: false }),
        _ => return None,
    };
    Some(ctor)
}

fn require<'a>(params: &'a CmdParams, name: &'static str) -> Result<&'a str, CmdError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or(CmdError::MissingParam(name))
}

/// One invocation of a named command.
pub struct Command {
    id: String,
    method: String,
    proxy: Arc<Proxy>,
    handler: Option<Box<dyn CommandHandler>>,
    events_tx: Option<mpsc::Sender<CmdEvent>>,
    events_rx: Option<mpsc::Receiver<CmdEvent>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl Command {
    /// Build an invocation of `method`. When no `id` is supplied a fresh
    /// UUID is assigned. Fails with [`CmdError::UnknownMethod`] when no
    /// handler is registered under that name.
    pub fn new(method: &str, id: Option<String>, proxy: Arc<Proxy>) -> Result<Command, CmdError> {
        let ctor = handler_for(method).ok_or(CmdError::UnknownMethod)?;
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let (events_tx, events_rx) = mpsc::channel(1);
        Ok(Command {
            id,
            method: method.to_owned(),
            proxy,
            handler: Some(ctor()),
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
        })
    }

    /// The invocation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The method name this invocation runs.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Take the event channel to drain. The channel closing is the end
    /// signal; an [`CmdEvent::Error`] is always the last event before it.
    pub fn take_events(&mut self) -> mpsc::Receiver<CmdEvent> {
        self.events_rx.take().expect("events already taken")
    }

    /// Validate the parameters and schedule the handler on its own task.
    /// Every value must be a string, else nothing is scheduled and
    /// [`CmdError::BadParams`] is returned.
    pub fn run(&mut self, params: Map<String, Value>) -> Result<(), CmdError> {
        let mut typed = CmdParams::with_capacity(params.len());
        for (name, value) in params {
            let Value::String(value) = value else {
                return Err(CmdError::BadParams);
            };
            typed.insert(name, value);
        }

        let handler = self.handler.take().expect("command already running");
        let events = self.events_tx.take().expect("command already running");
        let ctx = Arc::new(CmdContext {
            id: self.id.clone(),
            proxy: Arc::clone(&self.proxy),
            events: std::sync::Mutex::new(Some(events)),
        });
        tracing::debug!(target: LOG_TARGET, cmd = %self.id, method = %self.method, "running");
        tokio::spawn(async move {
            handler.run(ctx, typed).await;
        });
        Ok(())
    }
}
