//! # Protocol Messages
//!
//! Defines the JSON-RPC 2.0 envelope (Call, Notification, Reply).
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown envelope fields are ignored.
//! - A Call always carries a non-null id. A Reply always carries the id of the Call it answers.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// The only protocol version we speak.
pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Server range: -32000 to -32099
pub const HANDLER_FAILED: i64 = -32000;

/// A request identifier. Integers and strings never compare equal to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// The `error` member of a failed Reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "The method does not exist or is not available")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self::new(HANDLER_FAILED, message)
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A single JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Reply {
        id: Id,
        result: std::result::Result<Value, ErrorObject>,
    },
}

impl Message {
    pub fn call(id: impl Into<Id>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Call { id: id.into(), method: method.into(), params }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification { method: method.into(), params }
    }

    pub fn reply_ok(id: impl Into<Id>, result: Value) -> Self {
        Self::Reply { id: id.into(), result: Ok(result) }
    }

    pub fn reply_err(id: impl Into<Id>, error: ErrorObject) -> Self {
        Self::Reply { id: id.into(), result: Err(error) }
    }

    /// The id, if this message carries one (Calls and Replies).
    pub fn id(&self) -> Option<&Id> {
        match self {
            Self::Call { id, .. } | Self::Reply { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }

    /// The method name, if this message carries one (Calls and Notifications).
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Call { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Reply { .. } => None,
        }
    }

    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::Notification { .. } => "notification",
            Self::Reply { result: Ok(_), .. } => "reply",
            Self::Reply { result: Err(_), .. } => "error-reply",
        }
    }

    /// Parses and classifies exactly one JSON value.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Parses and classifies an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => {}
            Value::Array(_) => return Err(Error::Malformed("Batch messages are not supported".into())),
            _ => return Err(Error::Malformed("Message is not a JSON object".into())),
        }
        let envelope: Envelope = serde_json::from_value(value)?;
        Self::try_from(envelope)
    }

    /// Serializes this message as one compact JSON value.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Envelope::from(self))?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(Envelope::from(self))?)
    }
}

// ============================================================================
//  WIRE ENVELOPE
// ============================================================================

/// Flat view of every member a JSON-RPC object may carry.
///
/// `id`, `params` and `result` distinguish "absent" (`None`) from "null"
/// (`Some(Value::Null)`), which the classification rules depend on.
#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

/// Maps a present member to `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn decode_id(value: Value) -> Result<Id> {
    match value {
        Value::Null => Err(Error::Malformed("Null id".into())),
        other => serde_json::from_value(other)
            .map_err(|_| Error::Malformed("Id must be an integer or a string".into())),
    }
}

impl TryFrom<Envelope> for Message {
    type Error = Error;

    fn try_from(env: Envelope) -> Result<Self> {
        match env.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => return Err(Error::Malformed(format!("Unsupported jsonrpc version {:?}", other))),
            None => return Err(Error::Malformed("Missing jsonrpc version".into())),
        }

        if let Some(method) = env.method {
            if method.is_empty() {
                return Err(Error::Malformed("Empty method name".into()));
            }
            if env.result.is_some() || env.error.is_some() {
                return Err(Error::Malformed("Request carries a result or error".into()));
            }
            return match env.id {
                Some(id) => Ok(Message::Call { id: decode_id(id)?, method, params: env.params }),
                None => Ok(Message::Notification { method, params: env.params }),
            };
        }

        let id = env.id.ok_or(Error::Malformed("Message has neither method nor id".into()))?;
        let id = decode_id(id)?;

        match (env.result, env.error) {
            (Some(result), None) => Ok(Message::Reply { id, result: Ok(result) }),
            (None, Some(error)) => Ok(Message::Reply { id, result: Err(error) }),
            (Some(_), Some(_)) => Err(Error::Malformed("Reply carries both result and error".into())),
            (None, None) => Err(Error::Malformed("Reply carries neither result nor error".into())),
        }
    }
}

impl From<&Message> for Envelope {
    fn from(msg: &Message) -> Self {
        let mut env = Envelope {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };

        match msg {
            Message::Call { id, method, params } => {
                env.id = Some(id_value(id));
                env.method = Some(method.clone());
                env.params = params.clone();
            }
            Message::Notification { method, params } => {
                env.method = Some(method.clone());
                env.params = params.clone();
            }
            Message::Reply { id, result } => {
                env.id = Some(id_value(id));
                match result {
                    Ok(value) => env.result = Some(value.clone()),
                    Err(error) => env.error = Some(error.clone()),
                }
            }
        }

        env
    }
}

fn id_value(id: &Id) -> Value {
    match id {
        Id::Number(n) => Value::from(*n),
        Id::String(s) => Value::from(s.as_str()),
    }
}
