use thiserror::Error;

/// Errors surfaced by the session layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Renewal failed or was impossible. The local session has been cleared.
    #[error("session expired, please sign in again")]
    SessionExpired,
    #[error("another message is still being sent")]
    ConflictingSend,
    #[error("stream failed: {0}")]
    StreamFailure(String),
    #[error("message is empty")]
    EmptyMessage,
    #[error("send was cancelled")]
    Cancelled,
    #[error("request failed with HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("credential storage failed: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Text suitable for showing next to the conversation.
    pub fn user_message(&self) -> String {
        match self {
            Self::SessionExpired => "Your session has expired. Please log in again.".to_string(),
            Self::ConflictingSend => {
                "Please wait for the current reply to finish before sending again.".to_string()
            }
            Self::StreamFailure(reason) => reason.clone(),
            Self::EmptyMessage => "Type a message first.".to_string(),
            Self::Cancelled => "Message cancelled.".to_string(),
            Self::Http { message, .. } => message.clone(),
            Self::Transport(_) => "Failed to send message".to_string(),
            Self::Decode(_) => "The server sent a response we could not read.".to_string(),
            Self::Storage(detail) => format!("Could not save your session: {detail}"),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
