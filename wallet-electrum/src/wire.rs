//! Electrum's wire format: newline-delimited JSON-RPC 2.0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outgoing request. Electrum servers echo the integer `id` back in the
/// matching response.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a [Value]) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }

    /// Serialize to a single newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line =
            serde_json::to_string(self).expect("request serialization is infallible");
        line.push('\n');
        line
    }
}

/// Any incoming line: a response (has `id`) or a subscription notification
/// (has `method`).
#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
}

/// A classified incoming message.
#[derive(Debug)]
pub enum Message {
    Response {
        id: u64,
        result: Result<Value, Value>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

/// Parse one line off the wire. Returns `None` for lines that are valid JSON
/// but neither a response nor a notification.
pub fn parse_line(line: &str) -> Result<Option<Message>, serde_json::Error> {
    let incoming: Incoming = serde_json::from_str(line)?;

    if let Some(id) = incoming.id {
        let result = match incoming.error {
            Some(error) if !error.is_null() => Err(error),
            _ => Ok(incoming.result.unwrap_or(Value::Null)),
        };
        return Ok(Some(Message::Response { id, result }));
    }

    if let Some(method) = incoming.method {
        return Ok(Some(Message::Notification {
            method,
            params: incoming.params.unwrap_or(Value::Null),
        }));
    }

    Ok(None)
}
