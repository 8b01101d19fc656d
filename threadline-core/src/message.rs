//! Message and document model.
//!
//! The persisted form is a JSON array of top-level messages:
//! ```text
//! [
//!   { "id": 0, "time": 1700000000, "name": "ada", "content": "hi",
//!     "parentId": null,
//!     "replies": [
//!       { "id": 1, "time": 1700000005, "name": "bob", "content": "hey",
//!         "parentId": 0, "replies": [] }
//!     ] }
//! ]
//! ```
//! Field names are part of the on-disk contract and must not change.

use serde::{Deserialize, Serialize};

/// Message ids and parent references are signed 64-bit integers, so any
/// integer a legacy file or client sends decodes.
pub type MessageId = i64;

/// A single posted message, possibly carrying a tree of replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique across the whole document, nested replies included
    pub id: MessageId,
    /// Seconds since the Unix epoch, assigned at acceptance
    #[serde(rename = "time")]
    pub timestamp: u64,
    /// Display name of the poster (not verified)
    #[serde(rename = "name")]
    pub author: String,
    /// Message text
    #[serde(rename = "content")]
    pub body: String,
    /// Id of the message this replies to, `None` for top-level posts
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<MessageId>,
    /// Direct replies in insertion order
    #[serde(default)]
    pub replies: Vec<Message>,
}

impl Message {
    /// Create a message with no replies.
    pub fn new(
        id: MessageId,
        timestamp: u64,
        author: impl Into<String>,
        body: impl Into<String>,
        parent_id: Option<MessageId>,
    ) -> Self {
        Self {
            id,
            timestamp,
            author: author.into(),
            body: body.into(),
            parent_id,
            replies: Vec::new(),
        }
    }

    /// Whether this message was posted at the top level.
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Number of messages in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.replies.iter().map(Message::subtree_len).sum::<usize>()
    }
}

/// Errors produced while encoding or decoding a document.
#[derive(Debug, Clone)]
pub enum CodecError {
    /// The document could not be serialized
    Encode(String),
    /// The persisted bytes are not a valid document
    Decode(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Encode(e) => write!(f, "document encode error: {e}"),
            CodecError::Decode(e) => write!(f, "document decode error: {e}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// The whole board: top-level messages in acceptance order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    messages: Vec<Message>,
}

impl Document {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    /// Consume the document, returning its top-level messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Number of top-level messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages at every depth.
    pub fn total_messages(&self) -> usize {
        self.messages.iter().map(Message::subtree_len).sum()
    }

    /// Highest id anywhere in the tree.
    pub fn max_id(&self) -> Option<MessageId> {
        self.iter_all().map(|m| m.id).max()
    }

    /// Id the next accepted message receives: `max + 1`, or `0` when empty.
    /// `None` once the highest id is `MessageId::MAX`.
    pub fn next_id(&self) -> Option<MessageId> {
        match self.max_id() {
            Some(max) => max.checked_add(1),
            None => Some(0),
        }
    }

    /// Find a message by id at any depth.
    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.iter_all().find(|m| m.id == id)
    }

    /// Pre-order walk over every message in the tree.
    pub fn iter_all(&self) -> AllMessages<'_> {
        AllMessages {
            stack: self.messages.iter().rev().collect(),
        }
    }

    /// Serialize to the persisted JSON form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Parse persisted bytes. Zero-length input is an empty document.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl From<Vec<Message>> for Document {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Pre-order iterator returned by [`Document::iter_all`].
pub struct AllMessages<'a> {
    stack: Vec<&'a Message>,
}

impl<'a> Iterator for AllMessages<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.replies.iter().rev());
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut root = Message::new(0, 100, "ada", "hello", None);
        let mut reply = Message::new(1, 101, "bob", "hi ada", Some(0));
        reply.replies.push(Message::new(3, 103, "cy", "hi both", Some(1)));
        root.replies.push(reply);
        let other = Message::new(2, 102, "dee", "anyone?", None);
        Document::from(vec![root, other])
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::new();
        assert!(doc.is_empty());
        assert_eq!(doc.len(), 0);
        assert_eq!(doc.max_id(), None);
        assert_eq!(doc.next_id(), Some(0));
    }

    #[test]
    fn test_next_id_counts_nested_replies() {
        let doc = sample();
        assert_eq!(doc.max_id(), Some(3));
        assert_eq!(doc.next_id(), Some(4));
    }

    #[test]
    fn test_next_id_exhausted_at_max() {
        let doc = Document::decode(
            br#"[{"id":9223372036854775807,"time":1,"name":"a","content":"b","parentId":null}]"#,
        )
        .unwrap();
        assert_eq!(doc.max_id(), Some(MessageId::MAX));
        assert_eq!(doc.next_id(), None);
    }

    #[test]
    fn test_decode_negative_ids() {
        let doc = Document::decode(
            br#"[{"id":-3,"time":1,"name":"a","content":"b","parentId":-1}]"#,
        )
        .unwrap();
        assert_eq!(doc.messages()[0].parent_id, Some(-1));
        assert_eq!(doc.next_id(), Some(-2));
    }

    #[test]
    fn test_total_messages_and_len() {
        let doc = sample();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.total_messages(), 4);
    }

    #[test]
    fn test_iter_all_is_preorder() {
        let doc = sample();
        let ids: Vec<MessageId> = doc.iter_all().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 3, 2]);
    }

    #[test]
    fn test_find_any_depth() {
        let doc = sample();
        assert_eq!(doc.find(3).map(|m| m.author.as_str()), Some("cy"));
        assert!(doc.find(99).is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let msg = Message::new(7, 1_700_000_000, "ada", "hello there", None);
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["time"], 1_700_000_000u64);
        assert_eq!(value["name"], "ada");
        assert_eq!(value["content"], "hello there");
        assert!(value["parentId"].is_null());
        assert_eq!(value["replies"], serde_json::json!([]));
    }

    #[test]
    fn test_document_is_bare_array() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes.first(), Some(&b'['));
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value[0]["replies"][0]["parentId"], 0);
    }

    #[test]
    fn test_decode_empty_bytes() {
        let doc = Document::decode(b"").unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_decode_missing_replies_and_parent() {
        let doc = Document::decode(br#"[{"id":4,"time":1,"name":"a","content":"b"}]"#).unwrap();
        assert_eq!(doc.messages()[0].parent_id, None);
        assert!(doc.messages()[0].replies.is_empty());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = Document::decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode"));
    }

    #[test]
    fn test_encode_decode_preserves_tree() {
        let doc = sample();
        let decoded = Document::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }
}
