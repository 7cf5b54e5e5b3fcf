//! Wire protocol types for frontend-backend communication.
//!
//! Two layers:
//! - **Comm frames**: `comm_open`, `comm_msg`, `comm_close` carried between comm managers
//! - **Bridge payloads**: the `data` of a comm message, either an inbound
//!   [`Action`] (backend to frontend) or an outbound [`Command`] (frontend to backend)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Unique identifier for a comm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommId(uuid::Uuid);

impl CommId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl Default for CommId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frames exchanged between two comm managers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Frame {
    CommOpen {
        comm_id: CommId,
        target_name: String,
        #[serde(default)]
        data: Value,
    },

    CommMsg {
        comm_id: CommId,
        data: Value,
    },

    CommClose {
        comm_id: CommId,
    },
}

/// A message as delivered to a comm's receiver: `{content: {comm_id, data}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMessage {
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    pub comm_id: CommId,
    #[serde(default)]
    pub data: Value,
}

impl CommMessage {
    pub fn new(comm_id: CommId, data: Value) -> Self {
        Self {
            content: MessageContent { comm_id, data },
        }
    }

    pub fn data(&self) -> &Value {
        &self.content.data
    }
}

/// Target and endpoint addressed by a `call` or `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoke {
    pub target: String,
    pub endpoint: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Invoke {
    pub fn new(target: impl Into<String>, endpoint: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            endpoint: endpoint.into(),
            args,
        }
    }
}

/// Requests from the backend to the frontend bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum Action {
    /// Fire-and-forget invocation.
    Call(Invoke),

    Query { identifier: String, data: Invoke },

    Cancel { identifier: String },
}

impl Action {
    const KNOWN: [&'static str; 3] = ["call", "query", "cancel"];

    /// Parse the `data` of an inbound comm message.
    ///
    /// Unknown or missing `action` values are reported as unsupported rather
    /// than malformed so the user sees which action the backend asked for.
    pub fn from_payload(payload: &Value) -> Result<Self, BridgeError> {
        let action = match payload.get("action") {
            Some(Value::String(action)) if Self::KNOWN.contains(&action.as_str()) => action,
            Some(Value::String(other)) => {
                return Err(BridgeError::UnsupportedAction(other.clone()));
            }
            Some(other) => return Err(BridgeError::UnsupportedAction(other.to_string())),
            None => return Err(BridgeError::UnsupportedAction("undefined".to_string())),
        };

        serde_json::from_value(payload.clone()).map_err(|e| BridgeError::malformed(action, e))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Query { .. } => "query",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Messages from the frontend bridge to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum Command {
    /// Handshake telling the backend which private target to connect to.
    Register { target: String },

    Callback(Callback),
}

/// Reply to a `query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    #[serde(flatten)]
    pub outcome: Outcome,
    pub identifier: String,
}

impl Callback {
    pub fn value(identifier: impl Into<String>, value: Value) -> Self {
        Self {
            outcome: Outcome::Value(value),
            identifier: identifier.into(),
        }
    }

    pub fn error(identifier: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error(error.into()),
            identifier: identifier.into(),
        }
    }
}

/// Settled result of a query, flattened into the callback as `value` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(Value),
    Error(String),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Error(error) => Err(error),
        }
    }
}
