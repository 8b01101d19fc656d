//! JSON wire protocol carried in WebSocket text frames.
//!
//! Requests:
//! ```text
//! {"op":"create","requestId":"<uuid>","name":"ada","content":"hi","parentId":null}
//! {"op":"fetch","requestId":"<uuid>"}
//! ```
//! Responses echo the request id:
//! ```text
//! {"status":"ok","requestId":"<uuid>","body":{ ..message.. }}     create
//! {"status":"ok","requestId":"<uuid>","body":[ ..document.. ]}    fetch
//! {"status":"error","requestId":"<uuid>","error":"Message exceeds 50 words"}
//! ```
//! A frame that cannot be parsed as a request is answered with an error
//! carrying its `requestId` when one can still be read, else the nil id.

use serde::{Deserialize, Serialize};
use threadline_core::{Document, Message, MessageId};
use uuid::Uuid;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BoardRequest {
    /// Post a message, optionally as a reply
    Create {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        name: String,
        content: String,
        #[serde(rename = "parentId", default)]
        parent_id: Option<MessageId>,
    },
    /// Read the whole board
    Fetch {
        #[serde(rename = "requestId")]
        request_id: Uuid,
    },
}

impl BoardRequest {
    /// Create request with a fresh request id.
    pub fn create(
        name: impl Into<String>,
        content: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Self {
        Self::Create {
            request_id: Uuid::new_v4(),
            name: name.into(),
            content: content.into(),
            parent_id,
        }
    }

    /// Fetch request with a fresh request id.
    pub fn fetch() -> Self {
        Self::Fetch {
            request_id: Uuid::new_v4(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Create { request_id, .. } | Self::Fetch { request_id } => *request_id,
        }
    }

    /// Serialize to a text frame payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a text frame payload.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Best-effort read of `requestId` from a payload that failed [`decode`](Self::decode).
    pub fn salvage_request_id(text: &str) -> Option<Uuid> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        value.get("requestId")?.as_str()?.parse().ok()
    }
}

/// Successful response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// The accepted message (create)
    Message(Message),
    /// The whole board (fetch)
    Document(Document),
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BoardResponse {
    Ok {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        body: ResponseBody,
    },
    Error {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        error: String,
    },
}

impl BoardResponse {
    pub fn message(request_id: Uuid, message: Message) -> Self {
        Self::Ok {
            request_id,
            body: ResponseBody::Message(message),
        }
    }

    pub fn document(request_id: Uuid, document: Document) -> Self {
        Self::Ok {
            request_id,
            body: ResponseBody::Document(document),
        }
    }

    pub fn error(request_id: Uuid, error: impl Into<String>) -> Self {
        Self::Error {
            request_id,
            error: error.into(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Ok { request_id, .. } | Self::Error { request_id, .. } => *request_id,
        }
    }

    /// Serialize to a text frame payload.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse a text frame payload.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// The server answered with an error status
    Rejected(String),
    /// The response body did not match the request kind
    UnexpectedResponse,
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::Rejected(e) => write!(f, "Request rejected: {e}"),
            Self::UnexpectedResponse => write!(f, "Unexpected response body"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
