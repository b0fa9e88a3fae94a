use crate::error::ChatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const PROVISIONAL_PREFIX: &str = "temp-";

/// Locally generated id for the message currently being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvisionalId(Uuid);

impl ProvisionalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PROVISIONAL_PREFIX}{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageId {
    Provisional(ProvisionalId),
    Durable(String),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

/// Ids read back from the backend are always durable, whatever they look like.
impl From<String> for MessageId {
    fn from(raw: String) -> Self {
        Self::Durable(raw)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(id) => id.fmt(f),
            Self::Durable(id) => f.write_str(id),
        }
    }
}

/// One exchange: what the user sent and what the assistant answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    #[serde(default)]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn response_text(&self) -> &str {
        self.response.as_deref().unwrap_or_default()
    }
}

/// Ordered conversation with at most one optimistic entry.
///
/// Entries keep their position for their whole life; only appends, targeted
/// removal, bulk replacement and clearing change the order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    in_flight: Option<ProvisionalId>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn in_flight(&self) -> Option<ProvisionalId> {
        self.in_flight
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn start_optimistic(&mut self, content: impl Into<String>) -> Result<ProvisionalId, ChatError> {
        if self.in_flight.is_some() {
            return Err(ChatError::ConflictingSend);
        }
        let id = ProvisionalId::generate();
        self.messages.push(Message {
            id: MessageId::Provisional(id),
            content: content.into(),
            response: Some(String::new()),
            created_at: Utc::now(),
        });
        self.in_flight = Some(id);
        Ok(id)
    }

    /// Appends a response fragment. Returns false when the entry is gone.
    pub fn apply_chunk(&mut self, id: &ProvisionalId, fragment: &str) -> bool {
        match self.in_flight_mut(id) {
            Some(message) => {
                message
                    .response
                    .get_or_insert_with(String::new)
                    .push_str(fragment);
                true
            }
            None => false,
        }
    }

    pub fn promote(
        &mut self,
        id: &ProvisionalId,
        durable_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> bool {
        let Some(message) = self.in_flight_mut(id) else {
            return false;
        };
        message.id = MessageId::Durable(durable_id.into());
        message.created_at = created_at;
        self.in_flight = None;
        true
    }

    pub fn rollback(&mut self, id: &ProvisionalId) -> Option<Message> {
        let position = self.in_flight_position(id)?;
        self.in_flight = None;
        Some(self.messages.remove(position))
    }

    /// Loads a whole conversation. Any optimistic entry is discarded.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.in_flight = None;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.in_flight = None;
    }

    fn in_flight_position(&self, id: &ProvisionalId) -> Option<usize> {
        if self.in_flight.as_ref() != Some(id) {
            return None;
        }
        let target = MessageId::Provisional(*id);
        self.messages.iter().position(|message| message.id == target)
    }

    fn in_flight_mut(&mut self, id: &ProvisionalId) -> Option<&mut Message> {
        let position = self.in_flight_position(id)?;
        self.messages.get_mut(position)
    }
}
