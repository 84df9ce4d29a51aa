// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The management-interface client: JSON-RPC 2.0 request/response over a
//! connected UDP socket to the SIP proxy.
//!
//! The socket is owned by a background task with a request inbox. Requests
//! are stamped with a process-monotonic id and handled one at a time, so
//! there is never more than one id in flight and every reply can be checked
//! against the id that was sent. Callers get a [`MiPendingReply`] future back
//! immediately and may await it or drop it, depending on whether they care
//! about the reply.

use crate::rpc::{Id, Request, Response};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

const LOG_TARGET: &str = "call-api-mi";

/// Where the management interface lives when the configuration says nothing.
pub const DEFAULT_URL: &str = "127.0.0.1:8080";

/// How long a datagram write may take before the call is failed.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long we wait for the proxy to answer before the call is failed.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_DATAGRAM: usize = 65535;

/// Things that can go wrong talking to the management interface.
#[derive(Debug, thiserror::Error)]
pub enum MiError {
    /// Reading or writing the socket failed.
    #[error("MI transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The datagram write did not complete within [`WRITE_TIMEOUT`].
    #[error("MI write timed out")]
    WriteTimeout,
    /// No reply arrived within [`REPLY_TIMEOUT`].
    #[error("MI reply timed out")]
    ReplyTimeout,
    /// A reply arrived carrying an id other than the one in flight.
    #[error("MI reply id mismatch")]
    IdMismatch,
    /// The reply was not a JSON-RPC response.
    #[error("malformed MI reply: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The background task is gone; no more calls can be made.
    #[error("MI client is closed")]
    Closed,
}

struct MiCall {
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Response, MiError>>,
}

/// A handle to the management interface of one SIP proxy. Cheap to clone;
/// all clones feed the same background task and share its single in-flight
/// request slot.
#[derive(Debug, Clone)]
pub struct MiClient {
    to_task: mpsc::UnboundedSender<MiCall>,
    peer: SocketAddr,
}

impl MiClient {
    /// Connect to the management interface at `url` (a `host:port` pair).
    pub async fn connect(url: &str) -> Result<MiClient, MiError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(url).await?;
        let peer = socket.peer_addr()?;
        tracing::debug!(target: LOG_TARGET, %peer, "connected to MI");

        let (to_task, inbox) = mpsc::unbounded_channel();
        tokio::spawn(
            MiTask {
                socket,
                inbox,
                next_id: 0,
            }
            .run(),
        );

        Ok(MiClient { to_task, peer })
    }

    /// The remote socket address of the management interface.
    pub fn addr(&self) -> SocketAddr {
        self.peer
    }

    /// Issue a call. The request is queued to the background task and the
    /// returned future resolves once its reply is in (or its failure is
    /// known). Drop the future to fire and forget.
    pub fn call(&self, method: &str, params: Value) -> MiPendingReply {
        let (reply, rx) = oneshot::channel();
        let call = MiCall {
            method: method.to_owned(),
            params,
            reply,
        };
        if let Err(mpsc::error::SendError(call)) = self.to_task.send(call) {
            let _ = call.reply.send(Err(MiError::Closed));
        }
        MiPendingReply { rx }
    }

    /// Issue a call and wait for its reply.
    pub async fn call_sync(&self, method: &str, params: Value) -> Result<Response, MiError> {
        self.call(method, params).await
    }
}

/// A reply that has not arrived yet. Resolves to the decoded response, which
/// may still carry a JSON-RPC error object from the proxy.
pub struct MiPendingReply {
    rx: oneshot::Receiver<Result<Response, MiError>>,
}

impl Future for MiPendingReply {
    type Output = Result<Response, MiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(MiError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct MiTask {
    socket: UdpSocket,
    inbox: mpsc::UnboundedReceiver<MiCall>,
    next_id: u64,
}

impl MiTask {
    async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while let Some(call) = self.inbox.recv().await {
            let outcome = self.one_call(&call.method, call.params, &mut buf).await;
            if let Err(ref e) = outcome {
                tracing::error!(target: LOG_TARGET, method = %call.method, "MI call failed: {e}");
            }
            if call.reply.send(outcome).is_err() {
                tracing::trace!(target: LOG_TARGET, method = %call.method, "MI caller went away");
            }
        }
        tracing::debug!(target: LOG_TARGET, "MI client closed");
    }

    async fn one_call(
        &mut self,
        method: &str,
        params: Value,
        buf: &mut [u8],
    ) -> Result<Response, MiError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request::new(Id::Number(id), method, Some(params));
        let bytes = serde_json::to_vec(&request)?;

        tracing::trace!(target: LOG_TARGET, id, method, "MI request");
        match tokio::time::timeout(WRITE_TIMEOUT, self.socket.send(&bytes)).await {
            Err(_) => return Err(MiError::WriteTimeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        let read = match tokio::time::timeout(REPLY_TIMEOUT, self.socket.recv(buf)).await {
            Err(_) => return Err(MiError::ReplyTimeout),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(n)) => n,
        };

        let response: Response = serde_json::from_slice(&buf[..read])?;
        if response.id != Id::Number(id) {
            return Err(MiError::IdMismatch);
        }
        tracing::trace!(target: LOG_TARGET, id, method, "MI reply");
        Ok(response)
    }
}
