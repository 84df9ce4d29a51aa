// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The JSON-RPC 2.0 messages exchanged with both the client and the SIP
//! proxy: requests, responses and notifications, plus the small helpers the
//! rest of the crate uses to pick attributes out of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The protocol version stamped on every message.
pub const VERSION: &str = "2.0";

/// A request or response id. Management-interface requests use monotonic
/// unsigned integers; client requests use whatever the client sent, echoed
/// back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// A numeric id.
    Number(u64),
    /// An opaque string id.
    String(String),
    /// No id; serialized as `null`.
    #[default]
    Null,
}

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Always [`VERSION`].
    pub jsonrpc: String,
    /// Echoed back on the matching response.
    #[serde(default)]
    pub id: Id,
    /// The method to invoke.
    pub method: String,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request for the given method.
    pub fn new(id: Id, method: impl Into<String>, params: Option<Value>) -> Request {
        Request {
            jsonrpc: VERSION.to_owned(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC response; carries either a result or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always [`VERSION`].
    pub jsonrpc: String,
    /// The id of the request this responds to.
    #[serde(default)]
    pub id: Id,
    /// The result, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Build a success response.
    pub fn result(id: Id, result: Value) -> Response {
        Response {
            jsonrpc: VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: Id, error: RpcError) -> Response {
        Response {
            jsonrpc: VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Whether this is an error response.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Fetch a string attribute of the result object.
    pub fn string_value(&self, name: &str) -> Result<&str, AttrError> {
        string_attr(self.result.as_ref(), name)
    }
}

/// A JSON-RPC notification: a method call with no id and no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Always [`VERSION`].
    pub jsonrpc: String,
    /// The event or notification name.
    pub method: String,
    /// Notification attributes, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Value) -> Notification {
        Notification {
            jsonrpc: VERSION.to_owned(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Fetch a string attribute of the params object.
    pub fn string_value(&self, name: &str) -> Result<&str, AttrError> {
        string_attr(self.params.as_ref(), name)
    }
}

/// A JSON-RPC error object. Renders as `"<code> <message>"`.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code} {message}")]
pub struct RpcError {
    /// The error code.
    pub code: i64,
    /// A short human-readable description.
    pub message: String,
    /// Optional extra payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error object with no extra data.
    pub fn new(code: i64, message: impl Into<String>) -> RpcError {
        RpcError {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Failure to fetch a typed attribute out of a result or params object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttrError {
    /// The value holding the attributes is not an object.
    #[error("not an object")]
    NotAnObject,
    /// The attribute is absent.
    #[error("missing attribute {0}")]
    Missing(String),
    /// The attribute is there but has the wrong type.
    #[error("invalid type for {0}")]
    InvalidType(String),
}

fn string_attr<'a>(root: Option<&'a Value>, name: &str) -> Result<&'a str, AttrError> {
    let object = root
        .and_then(Value::as_object)
        .ok_or(AttrError::NotAnObject)?;
    match object.get(name) {
        None => Err(AttrError::Missing(name.to_owned())),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(AttrError::InvalidType(name.to_owned())),
    }
}
