//! Axum Handlers for the REST API
//!
//! This module exposes the lab controller over HTTP. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use ailab_core::{
    ControllerError, LabSnapshot,
    audio::{AudioClip, AudioError, SPEECH_SAMPLE_RATE},
    controller::{EMPTY_API_KEY_MESSAGE, INVALID_API_KEY_MESSAGE},
    sound::SoundEffect,
};
use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::{
    models::{AboutInfo, ActionPayload, ApiKeyPayload, ErrorResponse, MessagePayload, OutcomeResponse},
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::Busy => ApiError::Conflict(err.to_string()),
            ControllerError::MissingApiKey => ApiError::Unauthorized(err.to_string()),
            ControllerError::Gateway(ref e) if e.is_invalid_api_key() => {
                warn!(error = %e, "Rejected API key");
                ApiError::Unauthorized(INVALID_API_KEY_MESSAGE.to_string())
            }
            ControllerError::EmptyApiKey => ApiError::BadRequest(EMPTY_API_KEY_MESSAGE.to_string()),
            ControllerError::EmptyMessage | ControllerError::NotALabAction(_) => {
                ApiError::BadRequest(err.to_string())
            }
            ControllerError::Gateway(_) | ControllerError::Storage(_) => {
                ApiError::InternalServerError(err.into())
            }
        }
    }
}

impl From<AudioError> for ApiError {
    fn from(err: AudioError) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn wav_response(clip: &AudioClip) -> Response {
    ([(header::CONTENT_TYPE, "audio/wav")], clip.to_wav()).into_response()
}

/// Get the current state of the lab.
#[utoipa::path(
    get,
    path = "/lab",
    responses(
        (status = 200, description = "Current lab snapshot", body = LabSnapshot)
    )
)]
pub async fn get_lab(State(state): State<Arc<AppState>>) -> Json<LabSnapshot> {
    Json(state.controller.snapshot().await)
}

/// Perform a lab action and get the tutor's explanation.
#[utoipa::path(
    post,
    path = "/lab/actions",
    request_body = ActionPayload,
    responses(
        (status = 200, description = "Action performed", body = OutcomeResponse),
        (status = 400, description = "Not a lab action", body = ErrorResponse),
        (status = 401, description = "API key missing or rejected", body = ErrorResponse),
        (status = 409, description = "A request is already in flight", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn dispatch_action(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActionPayload>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.controller.dispatch(payload.action).await?;
    let snapshot = state.controller.snapshot().await;
    Ok(Json(OutcomeResponse::new(outcome, snapshot)))
}

/// Send a free-text message: a quiz answer if one is pending, otherwise a question.
#[utoipa::path(
    post,
    path = "/lab/messages",
    request_body = MessagePayload,
    responses(
        (status = 200, description = "Message answered", body = OutcomeResponse),
        (status = 400, description = "Empty message", body = ErrorResponse),
        (status = 401, description = "API key missing or rejected", body = ErrorResponse),
        (status = 409, description = "A request is already in flight", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn submit_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.controller.submit_message(&payload.text).await?;
    let snapshot = state.controller.snapshot().await;
    Ok(Json(OutcomeResponse::new(outcome, snapshot)))
}

/// Reset the experiment and start a new conversation.
#[utoipa::path(
    post,
    path = "/lab/reset",
    responses(
        (status = 200, description = "Lab reset", body = OutcomeResponse),
        (status = 401, description = "API key missing or rejected", body = ErrorResponse),
        (status = 409, description = "A request is already in flight", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn reset_lab(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.controller.reset().await?;
    let snapshot = state.controller.snapshot().await;
    Ok(Json(OutcomeResponse::new(outcome, snapshot)))
}

/// Store the Gemini API key and load a greeting with it.
#[utoipa::path(
    put,
    path = "/lab/api-key",
    request_body = ApiKeyPayload,
    responses(
        (status = 200, description = "Key stored", body = OutcomeResponse),
        (status = 400, description = "Empty key", body = ErrorResponse),
        (status = 401, description = "Key rejected by the tutor service", body = ErrorResponse),
        (status = 409, description = "A request is already in flight", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn set_api_key(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ApiKeyPayload>,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let outcome = state.controller.set_api_key(&payload.api_key).await?;
    let snapshot = state.controller.snapshot().await;
    Ok(Json(OutcomeResponse::new(outcome, snapshot)))
}

/// Get the narration of a chat message as a WAV file.
#[utoipa::path(
    get,
    path = "/lab/messages/{id}/audio",
    params(
        ("id" = String, Path, description = "Message id, e.g. `init`")
    ),
    responses(
        (status = 200, description = "16-bit PCM mono WAV", content_type = "audio/wav"),
        (status = 404, description = "No audio for this message", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn message_audio(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let audio = state
        .controller
        .message_audio(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No audio for message '{}'", id)))?;
    let clip = AudioClip::from_speech_base64(&audio)?;
    Ok(wav_response(&clip))
}

/// Get a UI sound effect as a WAV file.
#[utoipa::path(
    get,
    path = "/sounds/{effect}",
    params(
        ("effect" = SoundEffect, Path, description = "click, send or receive")
    ),
    responses(
        (status = 200, description = "16-bit PCM mono WAV", content_type = "audio/wav"),
        (status = 404, description = "Unknown sound effect", body = ErrorResponse)
    )
)]
pub async fn sound_effect(Path(effect): Path<String>) -> Result<Response, ApiError> {
    let effect: SoundEffect = effect
        .parse()
        .map_err(|e: ailab_core::sound::UnknownSoundEffect| ApiError::NotFound(e.to_string()))?;
    Ok(wav_response(&effect.render(SPEECH_SAMPLE_RATE)))
}

/// Get the author panel information.
#[utoipa::path(
    get,
    path = "/about",
    responses(
        (status = 200, description = "Author information", body = AboutInfo)
    )
)]
pub async fn about() -> Json<AboutInfo> {
    Json(AboutInfo::default())
}
