// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The events a running command emits towards its session.

use super::CmdError;
use serde_json::Value;
use std::fmt;

/// Names the session synthesizes itself; handlers must never emit them.
pub const RESERVED_EVENTS: &[&str] = &["Started", "End", "Error"];

/// One progress event from a command. An `Error` is terminal: nothing else
/// follows it on the command's channel.
#[derive(Debug)]
pub enum CmdEvent {
    /// A named progress event, e.g. `TransferStart`.
    Event {
        /// The event name.
        name: String,
        /// Event attributes, if any.
        params: Option<Value>,
    },
    /// The command failed.
    Error(CmdError),
}

impl CmdEvent {
    /// Build a named event.
    ///
    /// # Panics
    ///
    /// Panics if `name` is one of [`RESERVED_EVENTS`]. That is a bug in the
    /// handler emitting the event, not a runtime input error.
    pub fn named(name: &str, params: Option<Value>) -> CmdEvent {
        if RESERVED_EVENTS.contains(&name) {
            panic!("event '{name}' is reserved");
        }
        CmdEvent::Event {
            name: name.to_owned(),
            params,
        }
    }

    /// Whether this is the terminal error event.
    pub fn is_error(&self) -> bool {
        matches!(self, CmdEvent::Error(_))
    }
}

impl fmt::Display for CmdEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmdEvent::Error(e) => write!(f, "{e}"),
            CmdEvent::Event { name, params: None } => write!(f, "{name}"),
            CmdEvent::Event {
                name,
                params: Some(params),
            } => write!(f, "{name}: {params}"),
        }
    }
}
