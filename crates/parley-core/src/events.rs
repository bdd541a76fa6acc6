use serde::{Deserialize, Serialize};

/// Client → server frame as it appears on the wire.
///
/// `sender` is optional: clients that rely on the identity the server
/// announced may leave it out.
#[derive(Clone, Debug, Deserialize)]
struct InboundFrame {
    #[serde(default)]
    sender: Option<String>,
    content: String,
}

/// A chat message received from one client, ready to be relayed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub content: String,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
        }
    }

    /// Decode a text frame. A missing or blank `sender` falls back to the
    /// identity assigned to the connection the frame arrived on.
    pub fn from_frame(raw: &str, fallback_sender: &str) -> Result<Self, serde_json::Error> {
        let frame: InboundFrame = serde_json::from_str(raw)?;
        let sender = match frame.sender {
            Some(sender) if !sender.trim().is_empty() => sender,
            _ => fallback_sender.to_string(),
        };
        Ok(Self {
            sender,
            content: frame.content,
        })
    }
}

/// Server → client events, discriminated by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// First frame on every connection: the display name assigned to it.
    Identity { name: String },

    /// A message relayed from another client.
    Message { sender: String, content: String },

    /// Reply suggestions for the latest message from `sender`.
    /// Exactly three entries, or none at all, which tells the client to
    /// hide whatever suggestions it is showing.
    Suggestions { sender: String, content: Vec<String> },
}

impl OutboundEvent {
    pub fn hide_suggestions(sender: impl Into<String>) -> Self {
        Self::Suggestions {
            sender: sender.into(),
            content: Vec::new(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Identity { .. } => "identity",
            Self::Message { .. } => "message",
            Self::Suggestions { .. } => "suggestions",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
