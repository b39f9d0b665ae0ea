//! Fragment Model and Resolver
//!
//! A fragment is one chunk of assistant output as produced by the generator
//! process, plus the routing metadata the relay needs to deliver it.
//!
//! # Wire Format
//!
//! Fragments travel over the log as JSON objects:
//!
//! ```json
//! {
//!   "conversation_id": "c1",
//!   "user_id": "u1",
//!   "message": "Hello",
//!   "sender": "assistant",
//!   "error": false,
//!   "timestamp": 1718000000000,
//!   "last_message": false
//! }
//! ```
//!
//! Only `conversation_id` is mandatory; every other field falls back to its
//! default so that generators may omit flags they never set.
//!
//! # Display Messages
//!
//! [`resolve`] maps a fragment to the string a browser receives. Terminal
//! fragments become the sentinels [`DONE_SENTINEL`] / [`ERROR_SENTINEL`]; these
//! are ordinary inbox messages, so the transport layer never special-cases them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display value signalling successful completion of a reply
pub const DONE_SENTINEL: &str = "[DONE]";

/// Display value signalling failed completion of a reply
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// Identifier of a conversation, as assigned by the chat backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a raw conversation id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One unit of assistant output with routing metadata
///
/// Immutable once decoded. Each fragment is consumed by exactly one
/// partition worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Conversation the fragment belongs to
    pub conversation_id: ConversationId,
    /// User that owns the conversation
    #[serde(default)]
    pub user_id: String,
    /// Text delta
    #[serde(rename = "message", default)]
    pub text: String,
    /// Author of the fragment (normally the assistant)
    #[serde(default)]
    pub sender: String,
    /// Whether generation failed
    #[serde(default)]
    pub error: bool,
    /// Creation time, unix milliseconds
    #[serde(default)]
    pub timestamp: i64,
    /// Whether this is the final fragment of the reply
    #[serde(default)]
    pub last_message: bool,
}

impl Fragment {
    /// Create a non-terminal text fragment
    pub fn text(conversation_id: impl Into<ConversationId>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: String::new(),
            text: text.into(),
            sender: "assistant".to_string(),
            error: false,
            timestamp: 0,
            last_message: false,
        }
    }

    /// Create a terminal fragment
    pub fn terminal(conversation_id: impl Into<ConversationId>, error: bool) -> Self {
        Self {
            error,
            last_message: true,
            ..Self::text(conversation_id, "")
        }
    }

    /// Decode a fragment from its raw log payload
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::Decode`] if the payload is not a JSON object
    /// with a `conversation_id`.
    pub fn decode(payload: &[u8]) -> Result<Self, FragmentError> {
        serde_json::from_slice(payload).map_err(FragmentError::Decode)
    }

    /// Encode the fragment into its wire representation
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, FragmentError> {
        serde_json::to_vec(self).map_err(FragmentError::Encode)
    }

    /// Whether this fragment ends the reply
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.last_message
    }

    /// The display message delivered to the browser for this fragment
    #[must_use]
    pub fn display(&self) -> String {
        resolve(self.error, self.last_message, &self.text).to_string()
    }
}

/// Map fragment flags and text to the display message
///
/// Pure function: terminal+error yields [`ERROR_SENTINEL`], terminal yields
/// [`DONE_SENTINEL`], anything else yields the text delta unchanged.
#[must_use]
pub fn resolve(error: bool, last_message: bool, text: &str) -> &str {
    match (last_message, error) {
        (true, true) => ERROR_SENTINEL,
        (true, false) => DONE_SENTINEL,
        (false, _) => text,
    }
}

/// Errors produced when converting fragments to and from the wire
#[derive(Debug, Error)]
pub enum FragmentError {
    /// Payload could not be decoded
    #[error("malformed fragment payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// Fragment could not be encoded
    #[error("failed to encode fragment: {0}")]
    Encode(#[source] serde_json::Error),
}
