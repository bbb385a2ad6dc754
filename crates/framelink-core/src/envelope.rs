//! Wire envelope exchanged between host and child.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value of the `type` field carried by every protocol envelope.
pub const MESSAGE_TYPE: &str = "application/x-postmate-v1+json";

/// Name of the field that carries the message kind.
pub const DISCRIMINANT: &str = "postmate";

/// Name of the field that carries [`MESSAGE_TYPE`].
pub const TYPE_FIELD: &str = "type";

/// Kind of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Handshake,
    HandshakeReply,
    Call,
    Emit,
    Reply,
    Request,
}

impl MessageKind {
    /// All recognized kinds.
    pub const ALL: [Self; 6] = [
        Self::Handshake,
        Self::HandshakeReply,
        Self::Call,
        Self::Emit,
        Self::Reply,
        Self::Request,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::HandshakeReply => "handshake-reply",
            Self::Call => "call",
            Self::Emit => "emit",
            Self::Reply => "reply",
            Self::Request => "request",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Payload of an `emit` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitValue {
    /// Event name.
    pub name: String,
    /// Event data.
    #[serde(default)]
    pub data: Value,
}

/// Protocol message, tagged by the `postmate` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "postmate", rename_all = "kebab-case")]
pub enum Message {
    /// Host asks the child to establish a session.
    Handshake {
        /// Host-provided model defaults.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<Map<String, Value>>,
    },
    /// Child accepts the session.
    HandshakeReply,
    /// Fire-and-forget invocation of a model function.
    Call {
        key: String,
        #[serde(default)]
        data: Value,
    },
    /// Child-to-host event.
    Emit { value: EmitValue },
    /// Answer to a `Request`.
    Reply {
        uid: u64,
        #[serde(default)]
        value: Value,
    },
    /// Host reads a model property.
    Request { key: String, uid: u64 },
}

impl Message {
    /// Kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Handshake { .. } => MessageKind::Handshake,
            Self::HandshakeReply => MessageKind::HandshakeReply,
            Self::Call { .. } => MessageKind::Call,
            Self::Emit { .. } => MessageKind::Emit,
            Self::Reply { .. } => MessageKind::Reply,
            Self::Request { .. } => MessageKind::Request,
        }
    }
}

/// A message plus the protocol type marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub marker: String,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Wrap a message with the protocol marker.
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            marker: MESSAGE_TYPE.to_string(),
            message,
        }
    }

    /// Kind of the wrapped message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.message.kind()
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
