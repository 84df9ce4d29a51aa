// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! This crate lets external JSON-RPC clients drive telephony operations on a
//! SIP proxy. Clients issue commands (start a call, transfer it, place it on
//! hold, end it) over a duplex message stream; each command is translated
//! into management-interface calls to the proxy and correlated with the
//! asynchronous SIP events the proxy pushes back over UDP, so the client
//! receives a stream of progress notifications until the command terminates.
//!
//! The pieces, bottom up:
//!
//! - [`rpc`]: the JSON-RPC 2.0 messages spoken on every transport.
//! - [`mi`]: the management-interface client; request/response over UDP with
//!   id correlation.
//! - [`event`]: the event multiplexer; one UDP listener fanned out to any
//!   number of in-process subscribers, with optional attribute filters.
//! - [`proxy`]: the facade commands use to reach both of the above.
//! - [`cmd`]: the command engine and the per-command state machines.
//! - [`session`]: one per client connection; parses requests, spawns
//!   commands and multiplexes their event streams back to the client.
//! - [`config`]: YAML configuration shared by the binaries.

pub mod cmd;
pub mod config;
pub mod event;
pub mod mi;
pub mod proxy;
pub mod rpc;
pub mod session;

pub use cmd::{CmdError, CmdEvent, Command};
pub use config::Config;
pub use proxy::Proxy;
pub use session::Session;
