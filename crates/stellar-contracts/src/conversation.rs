use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text that replaces a reply whose stream failed.
pub const CHAT_ERROR_TEXT: &str =
    "**Error:** Failed to get response. Please check connection or safety settings.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    System,
}

impl Role {
    /// Role name the remote API expects in history. Only `user` and `model`
    /// exist there, so system entries travel as `model`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model | Role::System => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_error: false,
        }
    }
}

/// One prior turn as sent to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub text: String,
}

/// State captured when an exchange opens: the turns before it and the new
/// user text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeStart {
    pub history: Vec<HistoryTurn>,
    pub user_text: String,
    pub reply_id: String,
}

/// Ordered, append-only chat transcript with at most one reply in flight.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    in_flight: Option<usize>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the user message and an empty model placeholder, and marks the
    /// placeholder as the in-flight reply.
    pub fn begin_exchange(&mut self, user_text: &str) -> anyhow::Result<ExchangeStart> {
        if user_text.trim().is_empty() {
            bail!("message is empty");
        }
        if self.in_flight.is_some() {
            bail!("a reply is still streaming");
        }

        let history = self
            .messages
            .iter()
            .map(|message| HistoryTurn {
                role: message.role.wire_name().to_string(),
                text: message.text.clone(),
            })
            .collect();

        self.messages.push(Message::new(Role::User, user_text));
        let reply = Message::new(Role::Model, String::new());
        let reply_id = reply.id.clone();
        self.messages.push(reply);
        self.in_flight = Some(self.messages.len() - 1);

        Ok(ExchangeStart {
            history,
            user_text: user_text.to_string(),
            reply_id,
        })
    }

    pub fn append_chunk(&mut self, chunk: &str) {
        if let Some(message) = self.in_flight_message_mut() {
            message.text.push_str(chunk);
        }
    }

    pub fn finish(&mut self) {
        self.in_flight = None;
    }

    /// Replaces the in-flight reply with the fixed error text and closes it.
    pub fn fail(&mut self) {
        if let Some(message) = self.in_flight_message_mut() {
            message.text = CHAT_ERROR_TEXT.to_string();
            message.is_error = true;
        }
        self.in_flight = None;
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&Message> {
        self.in_flight.and_then(|idx| self.messages.get(idx))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn in_flight_message_mut(&mut self) -> Option<&mut Message> {
        let idx = self.in_flight?;
        self.messages.get_mut(idx)
    }
}
