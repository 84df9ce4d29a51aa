// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The event multiplexer: one UDP listener fanned out to any number of
//! in-process subscribers.
//!
//! The SIP proxy pushes events as JSON-RPC notifications to whatever socket
//! was registered with `event_subscribe`. The multiplexer binds a single
//! listening socket on the interface used to reach the management interface,
//! keeps exactly one remote subscription per event name, and dispatches every
//! incoming notification to the local subscriptions whose filter it
//! satisfies. Each local subscription gets its own buffered channel, so a
//! slow consumer never stalls the listener.
//!
//! Remote subscriptions are registered with a positive expiry and renewed at
//! half that period by a background task; when the last local subscription
//! for an event goes away the remote one is torn down with expiry zero.

use crate::mi::MiClient;
use crate::rpc::Notification;
use futures::Stream;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

const LOG_TARGET: &str = "call-api-event";

/// Seconds until a remote subscription lapses unless renewed.
pub const SUBSCRIPTION_EXPIRY: u64 = 120;

const MAX_DATAGRAM: usize = 65535;

/// Attribute values a notification must carry to reach a subscriber.
pub type EventFilter = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmState {
    Pending,
    Subscribed,
    Failed,
}

struct LocalSubscriber {
    id: u64,
    filter: Option<EventFilter>,
    sender: mpsc::UnboundedSender<Notification>,
}

impl LocalSubscriber {
    fn matches(&self, notification: &Notification) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let Some(params) = notification.params.as_ref().and_then(Value::as_object) else {
            return filter.is_empty();
        };
        filter
            .iter()
            .all(|(key, want)| params.get(key).and_then(Value::as_str) == Some(want.as_str()))
    }
}

struct RemoteSubscription {
    confirm: watch::Sender<ConfirmState>,
    subscribers: Vec<LocalSubscriber>,
}

#[derive(Default)]
struct Registry {
    events: HashMap<String, RemoteSubscription>,
    next_subscriber_id: u64,
}

struct Shared {
    mi: MiClient,
    // The listener address in the form the proxy expects, e.g. "udp:10.0.0.2:39605".
    socket_addr: String,
    registry: Mutex<Registry>,
}

/// The per-process event fan-out. Cheap to clone; every clone (and every
/// outstanding [`Subscription`]) keeps the listener and renewal tasks alive,
/// and they stop once the last one is dropped.
#[derive(Clone)]
pub struct EventMultiplexer {
    shared: Arc<Shared>,
    _keepalive: Arc<watch::Sender<()>>,
}

impl EventMultiplexer {
    /// Bind the listening socket and start the listener and renewal tasks.
    ///
    /// The listener is bound to an ephemeral port on the interface the kernel
    /// picks for reaching the management interface, found by connecting a
    /// throwaway socket to it.
    pub async fn new(mi: MiClient) -> Result<EventMultiplexer, std::io::Error> {
        let any: SocketAddr = match mi.addr() {
            SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
            SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
        };
        let probe = UdpSocket::bind(any).await?;
        probe.connect(mi.addr()).await?;
        let local_ip = probe.local_addr()?.ip();
        drop(probe);

        let socket = UdpSocket::bind((local_ip, 0)).await?;
        let local = socket.local_addr()?;
        let socket_addr = format!("udp:{local}");
        tracing::debug!(target: LOG_TARGET, listener = %socket_addr, "listening for events");

        let shared = Arc::new(Shared {
            mi,
            socket_addr,
            registry: Mutex::new(Registry::default()),
        });

        let (keepalive, shutdown) = watch::channel(());
        tokio::spawn(listen(socket, Arc::downgrade(&shared), shutdown.clone()));
        tokio::spawn(renew(Arc::downgrade(&shared), shutdown));

        Ok(EventMultiplexer {
            shared,
            _keepalive: Arc::new(keepalive),
        })
    }

    /// The listener address, as registered with the proxy.
    pub fn socket_addr(&self) -> &str {
        &self.shared.socket_addr
    }

    /// Subscribe to every notification of the named event.
    pub async fn subscribe(&self, event: &str) -> Option<Subscription> {
        self.subscribe_inner(event, None).await
    }

    /// Subscribe to notifications of the named event whose params carry every
    /// attribute the filter names, with the required value.
    pub async fn subscribe_filter(&self, event: &str, filter: EventFilter) -> Option<Subscription> {
        self.subscribe_inner(event, Some(filter)).await
    }

    async fn subscribe_inner(&self, event: &str, filter: Option<EventFilter>) -> Option<Subscription> {
        let (sender, notifications) = mpsc::unbounded_channel();

        // Attach under the lock. The first subscriber for an event also
        // creates the remote bookkeeping and then performs the MI call
        // outside the lock; latecomers just wait for its confirmation.
        enum Attach {
            First,
            Existing(watch::Receiver<ConfirmState>),
        }
        let (id, attach) = {
            let mut registry = self.shared.registry.lock().expect("registry lock poisoned");
            let id = registry.next_subscriber_id;
            registry.next_subscriber_id += 1;
            let subscriber = LocalSubscriber { id, filter, sender };
            match registry.events.get_mut(event) {
                Some(remote) => {
                    let confirm = remote.confirm.subscribe();
                    remote.subscribers.push(subscriber);
                    (id, Attach::Existing(confirm))
                }
                None => {
                    let (confirm, _) = watch::channel(ConfirmState::Pending);
                    registry.events.insert(
                        event.to_owned(),
                        RemoteSubscription {
                            confirm,
                            subscribers: vec![subscriber],
                        },
                    );
                    (id, Attach::First)
                }
            }
        };

        let subscribed = match attach {
            Attach::First => {
                tracing::debug!(
                    target: LOG_TARGET,
                    event,
                    socket = %self.shared.socket_addr,
                    "subscribing",
                );
                let outcome = self
                    .shared
                    .mi
                    .call_sync("event_subscribe", self.subscribe_params(event, SUBSCRIPTION_EXPIRY))
                    .await;
                let subscribed = matches!(&outcome, Ok(response) if !response.is_error());
                let mut registry = self.shared.registry.lock().expect("registry lock poisoned");
                if let Some(remote) = registry.events.get_mut(event) {
                    let state = if subscribed {
                        ConfirmState::Subscribed
                    } else {
                        ConfirmState::Failed
                    };
                    let _ = remote.confirm.send(state);
                }
                if !subscribed {
                    registry.events.remove(event);
                }
                subscribed
            }
            Attach::Existing(mut confirm) => {
                let state = *confirm.borrow();
                let state = if state == ConfirmState::Pending {
                    match confirm.wait_for(|s| *s != ConfirmState::Pending).await {
                        Ok(state) => *state,
                        Err(_) => ConfirmState::Failed,
                    }
                } else {
                    state
                };
                if state == ConfirmState::Failed {
                    self.detach(event, id);
                }
                state == ConfirmState::Subscribed
            }
        };

        if !subscribed {
            tracing::error!(target: LOG_TARGET, event, "could not subscribe for event");
            return None;
        }
        Some(Subscription {
            event: event.to_owned(),
            id,
            mux: self.clone(),
            notifications,
        })
    }

    fn subscribe_params(&self, event: &str, expire: u64) -> Value {
        json!({
            "event": event,
            "socket": self.shared.socket_addr,
            "expire": expire,
        })
    }

    // Drop a local subscriber without touching the remote subscription.
    fn detach(&self, event: &str, id: u64) -> bool {
        let mut registry = self.shared.registry.lock().expect("registry lock poisoned");
        let Some(remote) = registry.events.get_mut(event) else {
            return false;
        };
        remote.subscribers.retain(|s| s.id != id);
        if remote.subscribers.is_empty() {
            registry.events.remove(event);
            return true;
        }
        false
    }

    async fn remove(&self, event: &str, id: u64) {
        if !self.detach(event, id) {
            return;
        }
        // That was the last local subscription; tear the remote one down.
        tracing::debug!(target: LOG_TARGET, event, "unsubscribing");
        match self
            .shared
            .mi
            .call_sync("event_subscribe", self.subscribe_params(event, 0))
            .await
        {
            Ok(response) if !response.is_error() => {}
            Ok(response) => tracing::error!(
                target: LOG_TARGET,
                event,
                "could not unsubscribe for event: {}",
                response.error.map(|e| e.to_string()).unwrap_or_default(),
            ),
            Err(e) => {
                tracing::error!(target: LOG_TARGET, event, "could not unsubscribe for event: {e}");
            }
        }
    }
}

/// One local subscription, handed out by [`EventMultiplexer::subscribe`] and
/// [`EventMultiplexer::subscribe_filter`]. A stream of the notifications
/// that satisfy its filter, in the order the listener received them.
pub struct Subscription {
    event: String,
    id: u64,
    mux: EventMultiplexer,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    /// The event this subscription is for.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// The next notification, or `None` if the multiplexer went away.
    pub async fn next(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Detach this subscription. No further notifications are delivered; if
    /// it was the last one for its event, the remote subscription is removed
    /// with the proxy.
    pub async fn unsubscribe(self) {
        self.mux.remove(&self.event, self.id).await;
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.notifications.poll_recv(cx)
    }
}

async fn listen(socket: UdpSocket, shared: Weak<Shared>, mut shutdown: watch::Receiver<()>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
            res = socket.recv(&mut buf) => match res {
                Ok(n) => dispatch(&shared, &buf[..n]),
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, "error while listening for events: {e}");
                }
            }
        }
    }
    tracing::debug!(target: LOG_TARGET, "event listener closed");
}

fn dispatch(shared: &Weak<Shared>, datagram: &[u8]) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let notification: Notification = match serde_json::from_slice(datagram) {
        Ok(notification) => notification,
        Err(e) => {
            tracing::warn!(target: LOG_TARGET, "could not parse notification: {e}");
            return;
        }
    };

    let registry = shared.registry.lock().expect("registry lock poisoned");
    let Some(remote) = registry.events.get(&notification.method) else {
        tracing::warn!(
            target: LOG_TARGET,
            event = %notification.method,
            "unknown subscriber for event",
        );
        return;
    };
    for subscriber in &remote.subscribers {
        if subscriber.matches(&notification) {
            // The send only fails if the subscription was dropped without
            // unsubscribing; the notification is discarded then.
            let _ = subscriber.sender.send(notification.clone());
        }
    }
}

async fn renew(shared: Weak<Shared>, mut shutdown: watch::Receiver<()>) {
    let period = Duration::from_secs(SUBSCRIPTION_EXPIRY / 2);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let events: Vec<String> = {
            let registry = shared.registry.lock().expect("registry lock poisoned");
            registry
                .events
                .iter()
                .filter(|(_, remote)| *remote.confirm.borrow() == ConfirmState::Subscribed)
                .map(|(event, _)| event.clone())
                .collect()
        };
        for event in events {
            tracing::trace!(target: LOG_TARGET, %event, "renewing subscription");
            let params = json!({
                "event": event,
                "socket": shared.socket_addr,
                "expire": SUBSCRIPTION_EXPIRY,
            });
            match shared.mi.call_sync("event_subscribe", params).await {
                Ok(response) if !response.is_error() => {}
                Ok(_) | Err(_) => {
                    tracing::warn!(target: LOG_TARGET, %event, "could not renew subscription");
                }
            }
        }
    }
}
