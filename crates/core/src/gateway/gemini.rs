//! Talks to the Google Gemini REST API for tutor replies and narration.

use super::{GatewayError, Greeting, TutorGateway, TutorReply};
use crate::{
    audio::AudioClip,
    prompt::{GREETING_PROMPT, SYSTEM_INSTRUCTION, TutorPrompt, response_schema},
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Kore";

const API_KEY_HEADER: &str = "x-goog-api-key";

// --- Local Gemini REST types ---
mod gemini_types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerateContentRequest {
        pub contents: Vec<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system_instruction: Option<Content>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub generation_config: Option<GenerationConfig>,
    }
    #[derive(Serialize)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }
    #[derive(Serialize, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_schema: Option<Value>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub response_modalities: Vec<ResponseModality>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub speech_config: Option<SpeechConfig>,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct GenerateContentResponse {
        pub candidates: Option<Vec<Candidate>>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct Candidate {
        pub content: Option<CandidateContent>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct CandidateContent {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize)]
    pub(super) struct ErrorWrapper {
        pub error: ErrorBody,
    }
    #[derive(Deserialize)]
    pub(super) struct ErrorBody {
        pub message: Option<String>,
        pub status: Option<String>,
    }
}

use gemini_types::*;

/// Endpoint and model selection for [`GeminiGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub model: String,
    pub tts_model: String,
    pub voice: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// A `TutorGateway` backed by Gemini's `generateContent` endpoint.
pub struct GeminiGateway {
    client: Client,
    config: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model
        )
    }

    /// The key travels in a header so it never appears in the request URL.
    fn request(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequest,
    ) -> RequestBuilder {
        self.client
            .post(self.endpoint(model))
            .header(API_KEY_HEADER, api_key)
            .json(body)
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        body: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GatewayError> {
        let response = self.request(api_key, model, body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(GatewayError::from_message(
                Some(status.as_u16()),
                error_message(&body_text),
            ));
        }

        Ok(response.json().await?)
    }

    async fn generate_text(
        &self,
        api_key: &str,
        text: &str,
        generation_config: Option<GenerationConfig>,
    ) -> Result<String, GatewayError> {
        let request = tutor_request(text, generation_config);
        let response = self.generate(api_key, &self.config.model, &request).await?;
        Ok(response_text(response))
    }

    /// Narrates `text`, returning base64 PCM16 speech.
    async fn synthesize(&self, api_key: &str, text: &str) -> Result<Option<String>, GatewayError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: None,
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.config.voice.clone(),
                        },
                    },
                }),
                ..Default::default()
            }),
        };
        let response = self
            .generate(api_key, &self.config.tts_model, &request)
            .await?;
        Ok(response_audio(response))
    }

    /// Best-effort narration: any failure is logged and yields no audio.
    async fn narrate(&self, api_key: &str, text: &str) -> Option<String> {
        match self.synthesize(api_key, text).await {
            Ok(Some(audio)) => match AudioClip::from_speech_base64(&audio) {
                Ok(clip) if clip.is_empty() => {
                    debug!("Narration came back without samples");
                    None
                }
                Ok(clip) => {
                    debug!(duration = ?clip.duration(), "Synthesized narration");
                    Some(audio)
                }
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable narration");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Audio generation failed");
                None
            }
        }
    }
}

#[async_trait]
impl TutorGateway for GeminiGateway {
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn greeting(&self, api_key: &str) -> Result<Greeting, GatewayError> {
        let text = self
            .generate_text(api_key, GREETING_PROMPT, None)
            .await?
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        info!("Received greeting from Gemini");
        let audio = self.narrate(api_key, &text).await;
        Ok(Greeting { text, audio })
    }

    #[instrument(skip_all, fields(model = %self.config.model, action = %prompt.action))]
    async fn respond(
        &self,
        api_key: &str,
        prompt: &TutorPrompt,
    ) -> Result<TutorReply, GatewayError> {
        let raw = self
            .generate_text(api_key, &prompt.text, Some(structured_output()))
            .await?;

        let mut reply = TutorReply::from_model_text(&raw, prompt.allows_quiz);
        info!(has_quiz = reply.quiz.is_some(), "Received tutor reply from Gemini");
        reply.audio = self.narrate(api_key, &reply.speech_text()).await;
        Ok(reply)
    }
}

/// A single user turn under the tutor persona.
fn tutor_request(text: &str, generation_config: Option<GenerationConfig>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: text.to_string(),
            }],
        }],
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part {
                text: SYSTEM_INSTRUCTION.to_string(),
            }],
        }),
        generation_config,
    }
}

fn structured_output() -> GenerationConfig {
    GenerationConfig {
        response_mime_type: Some("application/json".to_string()),
        response_schema: Some(response_schema()),
        ..Default::default()
    }
}

/// Concatenated text parts of the first candidate, like the SDK's `response.text`.
fn response_text(response: GenerateContentResponse) -> String {
    first_candidate_parts(response)
        .into_iter()
        .filter_map(|part| part.text)
        .collect()
}

fn response_audio(response: GenerateContentResponse) -> Option<String> {
    first_candidate_parts(response)
        .into_iter()
        .find_map(|part| part.inline_data)
        .map(|blob| blob.data)
        .filter(|data| !data.is_empty())
}

fn first_candidate_parts(response: GenerateContentResponse) -> Vec<ServerPart> {
    response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default()
}

/// Extracts `"STATUS: message"` from Google's error envelope, falling back to the body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorWrapper>(body)
        .map(|wrapper| {
            let message = wrapper.error.message.unwrap_or_else(|| body.to_string());
            match wrapper.error.status.filter(|s| !s.is_empty()) {
                Some(status) => format!("{status}: {message}"),
                None => message,
            }
        })
        .unwrap_or_else(|_| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use serde_json::Value;

    fn tutor_request_body(prompt: &str) -> Value {
        serde_json::to_value(tutor_request(prompt, Some(structured_output()))).unwrap()
    }

    fn parse(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_body_shape() {
        let body = tutor_request_body("Giải thích bay hơi");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Giải thích bay hơi");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            body["generationConfig"]["responseSchema"]["required"][0],
            "explanation"
        );
        assert!(body["generationConfig"].get("responseModalities").is_none());
    }

    #[test]
    fn test_speech_request_shape() {
        let config = GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: DEFAULT_VOICE.to_string(),
                    },
                },
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert!(json.get("responseMimeType").is_none());
    }

    #[test]
    fn test_response_text_joins_parts() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"explanation\":"},{"text":"\"Hi\"}"}]}}]}"#,
        );
        assert_eq!(response_text(response), r#"{"explanation":"Hi"}"#);
        assert_eq!(response_text(parse(r#"{"candidates":[]}"#)), "");
        assert_eq!(response_text(parse("{}")), "");
    }

    #[test]
    fn test_response_audio_takes_inline_data() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAAA"}}]}}]}"#,
        );
        assert_eq!(response_audio(response).as_deref(), Some("AAAA"));
        assert_eq!(
            response_audio(parse(r#"{"candidates":[{"content":{"parts":[{"text":"no audio"}]}}]}"#)),
            None
        );
    }

    #[test]
    fn test_error_message_from_envelope() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        let message = error_message(body);
        assert_eq!(
            message,
            "INVALID_ARGUMENT: API key not valid. Please pass a valid API key."
        );
        assert!(GatewayError::from_message(Some(400), message).is_invalid_api_key());

        assert_eq!(error_message("upstream exploded"), "upstream exploded");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let gateway = GeminiGateway::new(GeminiConfig {
            api_base: "http://localhost:9000/v1beta/".to_string(),
            ..Default::default()
        });
        assert_eq!(
            gateway.endpoint("gemini-2.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_api_key_sent_as_header() {
        let gateway = GeminiGateway::new(GeminiConfig::default());
        let request = gateway
            .request("AIzaSECRET123", DEFAULT_MODEL, &tutor_request("Xin chào", None))
            .build()
            .unwrap();

        assert_eq!(request.url().query(), None);
        assert!(!request.url().as_str().contains("AIzaSECRET123"));
        assert_eq!(request.headers()[API_KEY_HEADER], "AIzaSECRET123");
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let gateway = GeminiGateway::new(GeminiConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        });
        let prompt = TutorPrompt {
            action: ActionType::AskQuestion,
            text: "Vì sao nước sôi?".to_string(),
            allows_quiz: false,
        };

        let err = gateway.respond("AIzaSECRET123", &prompt).await.unwrap_err();
        assert!(!err.is_invalid_api_key());
        assert!(!err.to_string().contains("AIzaSECRET123"));
        assert!(!format!("{err:?}").contains("AIzaSECRET123"));

        let err = gateway.greeting("AIzaSECRET123").await.unwrap_err();
        assert!(!err.to_string().contains("AIzaSECRET123"));
    }
}
