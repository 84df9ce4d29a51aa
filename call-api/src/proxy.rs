// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The facade commands talk to: one management-interface client plus one
//! event multiplexer, wired to the same SIP proxy, together with the static
//! bits of proxy configuration commands need (the outbound URI).

use crate::config::Config;
use crate::event::{EventFilter, EventMultiplexer, Subscription};
use crate::mi::{self, MiClient, MiError, MiPendingReply};
use crate::rpc::Response;
use serde_json::Value;

const LOG_TARGET: &str = "call-api-proxy";

/// Things that can go wrong building a [`Proxy`].
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The management-interface client could not be set up.
    #[error("could not create MI client: {0}")]
    Mi(#[from] MiError),
    /// The event listener could not be set up.
    #[error("could not create event listener: {0}")]
    Event(#[from] std::io::Error),
}

/// One SIP proxy as seen by commands.
pub struct Proxy {
    mi: MiClient,
    events: EventMultiplexer,
    uri: Option<String>,
}

impl Proxy {
    /// Connect the management-interface client and bind the event listener,
    /// per the configuration.
    pub async fn new(config: &Config) -> Result<Proxy, ProxyError> {
        let url = match config.mi.url.as_deref() {
            Some(url) => url,
            None => {
                tracing::debug!(target: LOG_TARGET, "using default url={}", mi::DEFAULT_URL);
                mi::DEFAULT_URL
            }
        };
        let mi = MiClient::connect(url).await?;
        let events = EventMultiplexer::new(mi.clone()).await?;
        Ok(Proxy {
            mi,
            events,
            uri: config.sip.uri.clone(),
        })
    }

    /// Issue a management-interface call; the returned future resolves to the
    /// reply and may be dropped to fire and forget.
    pub fn mi_call(&self, method: &str, params: Value) -> MiPendingReply {
        self.mi.call(method, params)
    }

    /// Issue a management-interface call and wait for its reply.
    pub async fn mi_call_sync(&self, method: &str, params: Value) -> Result<Response, MiError> {
        self.mi.call_sync(method, params).await
    }

    /// Subscribe to every notification of the named event.
    pub async fn subscribe(&self, event: &str) -> Option<Subscription> {
        self.events.subscribe(event).await
    }

    /// Subscribe to notifications of the named event matching the filter.
    pub async fn subscribe_filter(&self, event: &str, filter: EventFilter) -> Option<Subscription> {
        self.events.subscribe_filter(event, filter).await
    }

    /// The configured outbound next-hop URI, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
}
