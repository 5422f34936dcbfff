//! AI Gateway
//!
//! The contract with the hosted generative-language and text-to-speech
//! service. The lab only consumes it: the tutor's explanations, quiz choice and
//! grading all happen on the other side of this trait.

pub mod gemini;

use crate::{prompt::TutorPrompt, quiz::Quiz};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

pub use gemini::{GeminiConfig, GeminiGateway};

/// Used when the model returns valid JSON without a usable explanation.
pub const MISSING_EXPLANATION: &str = "Cô/Thầy chưa nghĩ ra lời giải thích. Con thử lại nhé!";
/// Used when the model returns nothing at all.
pub const EMPTY_REPLY: &str = "Có lỗi xảy ra, con thử lại sau nhé.";

/// Error substrings that mark a rejected credential.
const INVALID_KEY_MARKERS: [&str; 2] = ["API key not valid", "API_KEY_INVALID"];

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The key was rejected; the learner has to enter a new one.
    #[error("API key rejected: {0}")]
    InvalidApiKey(String),
    #[error("Gateway returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Gateway request failed: {0}")]
    Transport(String),
    #[error("Gateway returned no content")]
    EmptyResponse,
    #[error("Failed to decode gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Classifies a failure by its message text.
    ///
    /// Credential problems are only recognizable from the wording of the
    /// error, so this is a substring heuristic.
    pub fn from_message(status: Option<u16>, message: String) -> Self {
        if INVALID_KEY_MARKERS
            .iter()
            .any(|marker| message.contains(marker))
        {
            return GatewayError::InvalidApiKey(message);
        }
        match status {
            Some(status) => GatewayError::Http { status, message },
            None => GatewayError::Transport(message),
        }
    }

    pub fn is_invalid_api_key(&self) -> bool {
        matches!(self, GatewayError::InvalidApiKey(_))
    }
}

/// The request URL is stripped from the message before it is kept.
impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let decode = err.is_decode();
        let message = err.without_url().to_string();
        if decode {
            GatewayError::Decode(message)
        } else {
            GatewayError::from_message(status, message)
        }
    }
}

/// The session-opening welcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub text: String,
    /// Base64 PCM16 speech, if synthesis succeeded.
    pub audio: Option<String>,
}

/// What the tutor said back to one prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TutorReply {
    pub explanation: String,
    pub quiz: Option<Quiz>,
    pub audio: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredReply {
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    quiz: Option<StructuredQuiz>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuredQuiz {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    correct_answer_hint: Option<String>,
}

impl TutorReply {
    /// Interprets the model's text output.
    ///
    /// Well-formed JSON yields the explanation and, when `allows_quiz`, the
    /// quiz. Anything else degrades to the raw text as the explanation with no
    /// quiz. Audio is left empty.
    pub fn from_model_text(raw: &str, allows_quiz: bool) -> Self {
        let raw = raw.trim();
        match serde_json::from_str::<StructuredReply>(raw) {
            Ok(reply) => {
                let explanation = reply
                    .explanation
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
                    .unwrap_or_else(|| MISSING_EXPLANATION.to_string());
                let quiz = reply
                    .quiz
                    .filter(|_| allows_quiz)
                    .and_then(|quiz| {
                        let question = quiz.question?.trim().to_string();
                        (!question.is_empty()).then(|| {
                            Quiz::new(question, quiz.correct_answer_hint.unwrap_or_default())
                        })
                    });
                TutorReply {
                    explanation,
                    quiz,
                    audio: None,
                }
            }
            Err(e) => {
                warn!(error = %e, raw = %raw, "Tutor reply was not valid JSON, using raw text");
                let explanation = if raw.is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    raw.to_string()
                };
                TutorReply {
                    explanation,
                    quiz: None,
                    audio: None,
                }
            }
        }
    }

    /// Text to narrate: the explanation, followed by the quiz question if any.
    pub fn speech_text(&self) -> String {
        match &self.quiz {
            Some(quiz) => format!("{} {}", self.explanation, quiz.question),
            None => self.explanation.clone(),
        }
    }
}

/// Defines the contract for the external tutor service.
///
/// Implementations must swallow speech-synthesis failures (returning no audio)
/// rather than failing the whole call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TutorGateway: Send + Sync {
    /// Produces a short welcome for a fresh session.
    async fn greeting(&self, api_key: &str) -> Result<Greeting, GatewayError>;

    /// Answers a built prompt with an explanation and an optional quiz.
    async fn respond(&self, api_key: &str, prompt: &TutorPrompt)
    -> Result<TutorReply, GatewayError>;
}
