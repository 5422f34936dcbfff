//! Chat transcript between the learner and the tutor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canned notice appended when a tutor request fails for any reason other
/// than a rejected credential.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "Ôi, có lỗi kết nối với AI rồi. Con hãy thử tải lại trang nhé.";

const GREETING_ID: &str = "init";
const ERROR_ID_PREFIX: &str = "err-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "UPPERCASE")]
pub enum Sender {
    Ai,
    User,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Ai => write!(f, "AI"),
            Sender::User => write!(f, "USER"),
        }
    }
}

/// One transcript entry. `audio` holds base64 PCM16 speech for AI messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ChatMessage {
    /// The session-opening welcome.
    pub fn greeting(text: impl Into<String>, audio: Option<String>) -> Self {
        Self {
            id: GREETING_ID.to_string(),
            sender: Sender::Ai,
            text: text.into(),
            audio,
        }
    }

    /// Tutor reply to a lab action.
    pub fn ai(text: impl Into<String>, audio: Option<String>) -> Self {
        Self {
            id: now_millis().to_string(),
            sender: Sender::Ai,
            text: text.into(),
            audio,
        }
    }

    /// Tutor reply to a free-text message.
    pub fn feedback(text: impl Into<String>, audio: Option<String>) -> Self {
        Self {
            id: format!("{}-feedback", now_millis()),
            ..Self::ai(text, audio)
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: now_millis().to_string(),
            sender: Sender::User,
            text: text.into(),
            audio: None,
        }
    }

    pub fn error_notice(text: impl Into<String>) -> Self {
        Self {
            id: format!("{ERROR_ID_PREFIX}{}", now_millis()),
            sender: Sender::Ai,
            text: text.into(),
            audio: None,
        }
    }

    pub fn is_greeting(&self) -> bool {
        self.id == GREETING_ID
    }

    pub fn is_error_notice(&self) -> bool {
        self.id.starts_with(ERROR_ID_PREFIX)
    }

    /// Whether appending this message should play the "message received" cue.
    pub fn plays_receive_cue(&self) -> bool {
        self.sender == Sender::Ai && !self.is_greeting() && !self.is_error_notice()
    }
}

/// Insertion-ordered list of chat messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Appends an error notice unless the last message already says the same.
    ///
    /// Returns the appended message, or `None` when it was collapsed into the
    /// previous one.
    pub fn push_error_notice(&mut self, text: &str) -> Option<ChatMessage> {
        if self.last().is_some_and(|last| last.text == text) {
            return None;
        }
        let notice = ChatMessage::error_notice(text);
        self.messages.push(notice.clone());
        Some(notice)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Most recent message with the given id.
    pub fn find(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|message| message.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn replace_with(&mut self, message: ChatMessage) {
        self.messages = vec![message];
    }
}
