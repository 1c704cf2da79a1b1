//! JSON-RPC envelope types and reply/event classification.
//!
//! A decoded top-level object is a reply when it carries a non-null `id`
//! field and a push event otherwise. The protocol itself does not guarantee
//! this; it is how streaming servers behave in practice.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Caller-assigned request identifier.
///
/// Numbers and strings share one key space: `7` and `"7"` correlate to the
/// same pending call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// The key used in the correlation table.
    pub fn correlation_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<u32> for RequestId {
    fn from(n: u32) -> Self {
        RequestId::Number(i64::from(n))
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Outgoing request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Correlation id, echoed by the reply.
    pub id: RequestId,
    /// Remote method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Create a request with parameters.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a request without parameters.
    pub fn without_params(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply envelope, correlated to a request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Returns true if the peer answered with an error object.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the result value, mapping an error object to
    /// [`ClientError::Rpc`](crate::ClientError::Rpc).
    ///
    /// A reply with neither `result` nor `error` yields `Value::Null`.
    pub fn into_result(self) -> crate::Result<Value> {
        match self.error {
            Some(error) => Err(crate::ClientError::Rpc(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Push event envelope: any top-level object without an `id`.
///
/// Subscription notifications look like
/// `{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0x..","result":{..}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingMessage {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Set when the peer pushes an error with a null id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl StreamingMessage {
    /// The subscription id carried in `params.subscription`, if any.
    pub fn subscription(&self) -> Option<&str> {
        self.params.as_ref()?.get("subscription")?.as_str()
    }

    /// The pushed payload carried in `params.result`, if any.
    pub fn result(&self) -> Option<&Value> {
        self.params.as_ref()?.get("result")
    }
}

/// One assembled protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Reply to a pending call.
    Reply(RpcResponse),
    /// Unsolicited push event.
    Event(StreamingMessage),
    /// Well-formed JSON that is neither a reply nor an event.
    Unrecognized {
        /// The offending text, truncated for logging.
        raw: String,
        /// Why it could not be classified.
        reason: String,
    },
}

/// Maximum number of characters of raw text kept in [`Message::Unrecognized`].
const RAW_PREVIEW_LEN: usize = 256;

pub(crate) fn preview(raw: &str) -> String {
    raw.chars().take(RAW_PREVIEW_LEN).collect()
}

/// Classify one decoded JSON value.
///
/// Arrays are JSON-RPC batches: every element is classified on its own.
pub fn classify(value: Value) -> Vec<Message> {
    match value {
        Value::Array(items) => items.into_iter().map(classify_one).collect(),
        other => vec![classify_one(other)],
    }
}

fn classify_one(value: Value) -> Message {
    let has_id = match &value {
        Value::Object(map) => map.get("id").is_some_and(|id| !id.is_null()),
        _ => {
            return Message::Unrecognized {
                raw: preview(&value.to_string()),
                reason: "top-level value is not an object".to_string(),
            }
        }
    };

    if has_id {
        match serde_json::from_value::<RpcResponse>(value.clone()) {
            Ok(reply) => Message::Reply(reply),
            Err(e) => Message::Unrecognized {
                raw: preview(&value.to_string()),
                reason: format!("invalid reply envelope: {}", e),
            },
        }
    } else {
        match serde_json::from_value::<StreamingMessage>(value.clone()) {
            Ok(event) => Message::Event(event),
            Err(e) => Message::Unrecognized {
                raw: preview(&value.to_string()),
                reason: format!("invalid event envelope: {}", e),
            },
        }
    }
}
