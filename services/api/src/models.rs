//! API Models
//!
//! Request and response bodies of the HTTP surface, with `utoipa` schemas for
//! the OpenAPI document.

use ailab_core::{
    ActionType, LabSnapshot, Outcome, quiz::Quiz, sound::SoundEffect, transcript::ChatMessage,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct ActionPayload {
    #[schema(example = "HEAT_WATER")]
    pub action: ActionType,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct MessagePayload {
    #[schema(example = "Vì sao nước lại bay hơi?")]
    pub text: String,
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyPayload {
    #[schema(example = "AIza...")]
    pub api_key: String,
}

/// Result of an action or message: what changed plus the refreshed lab view.
#[derive(Serialize, ToSchema, Debug)]
pub struct OutcomeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<Quiz>,
    /// Sound effects to play, in order.
    pub cues: Vec<SoundEffect>,
    pub snapshot: LabSnapshot,
}

impl OutcomeResponse {
    pub fn new(outcome: Outcome, snapshot: LabSnapshot) -> Self {
        Self {
            message: outcome.message,
            quiz: outcome.quiz,
            cues: outcome.cues,
            snapshot,
        }
    }
}

/// Static contents of the author panel.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub header: String,
    pub school: String,
    pub address: String,
    pub phone: String,
    pub teacher: String,
}

impl Default for AboutInfo {
    fn default() -> Self {
        Self {
            header: "Ủy Ban Nhân Dân Xã Phước Mỹ Trung".to_string(),
            school: "Trường Tiểu Học Phước Mỹ Trung".to_string(),
            address: "ấp Phước Hậu, xã Phước Mỹ Trung, tỉnh Vĩnh Long.".to_string(),
            phone: "02753.845.133".to_string(),
            teacher: "Nguyễn Hải Dương".to_string(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ailab_core::LabState;

    fn empty_snapshot() -> LabSnapshot {
        LabSnapshot {
            lab: LabState::default(),
            actions: Vec::new(),
            busy: false,
            quiz: None,
            messages: Vec::new(),
            needs_api_key: false,
            api_key_error: None,
        }
    }

    #[test]
    fn test_action_payload_deserialization() {
        let payload: ActionPayload = serde_json::from_str(r#"{"action": "DISSOLVE_SALT"}"#).unwrap();
        assert_eq!(payload.action, ActionType::DissolveSalt);

        let result: Result<ActionPayload, _> = serde_json::from_str(r#"{"action": "BOIL"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_api_key_payload_uses_camel_case() {
        let payload: ApiKeyPayload = serde_json::from_str(r#"{"apiKey": "AIza-1"}"#).unwrap();
        assert_eq!(payload.api_key, "AIza-1");

        let result: Result<ApiKeyPayload, _> = serde_json::from_str(r#"{"api_key": "AIza-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_message_payload_missing_field() {
        let result: Result<MessagePayload, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_outcome_response_omits_absent_fields() {
        let response = OutcomeResponse::new(
            Outcome {
                message: None,
                quiz: None,
                cues: vec![SoundEffect::Click],
            },
            empty_snapshot(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("message").is_none());
        assert!(json.get("quiz").is_none());
        assert_eq!(json["cues"], serde_json::json!(["click"]));
        assert_eq!(json["snapshot"]["needsApiKey"], false);
        assert_eq!(json["snapshot"]["lab"]["saltLevel"], 0);
    }

    #[test]
    fn test_outcome_response_carries_quiz() {
        let response = OutcomeResponse::new(
            Outcome {
                message: Some(ChatMessage::ai("Nước bay hơi.", None)),
                quiz: Some(Quiz::new("Hơi nước có màu gì?", "không màu")),
                cues: vec![SoundEffect::Click, SoundEffect::Receive],
            },
            empty_snapshot(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["message"]["sender"], "AI");
        assert_eq!(json["quiz"]["correctAnswerHint"], "không màu");
        assert_eq!(json["cues"][1], "receive");
    }

    #[test]
    fn test_about_info_serialization() {
        let json = serde_json::to_value(AboutInfo::default()).unwrap();
        assert_eq!(json["school"], "Trường Tiểu Học Phước Mỹ Trung");
        assert_eq!(json["teacher"], "Nguyễn Hải Dương");
        assert_eq!(json["phone"], "02753.845.133");
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "No audio for message".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"No audio for message"}"#);
    }
}
