//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the lab API, the sound effects and the OpenAPI documentation.

use crate::{
    handlers,
    models::{AboutInfo, ActionPayload, ApiKeyPayload, ErrorResponse, MessagePayload, OutcomeResponse},
    state::AppState,
};
use ailab_core::{
    ActionType, LabSnapshot, LabState,
    controller::ActionAvailability,
    quiz::Quiz,
    sound::SoundEffect,
    transcript::{ChatMessage, Sender},
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_lab,
        handlers::dispatch_action,
        handlers::submit_message,
        handlers::reset_lab,
        handlers::set_api_key,
        handlers::message_audio,
        handlers::sound_effect,
        handlers::about,
    ),
    components(
        schemas(
            LabSnapshot, LabState, ActionAvailability, ActionType, Quiz, ChatMessage, Sender,
            SoundEffect, ActionPayload, MessagePayload, ApiKeyPayload, OutcomeResponse,
            AboutInfo, ErrorResponse
        )
    ),
    tags(
        (name = "AI Lab API", description = "Virtual water-phenomena lab with an AI tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/lab", get(handlers::get_lab))
        .route("/lab/actions", post(handlers::dispatch_action))
        .route("/lab/messages", post(handlers::submit_message))
        .route("/lab/messages/{id}/audio", get(handlers::message_audio))
        .route("/lab/reset", post(handlers::reset_lab))
        .route("/lab/api-key", put(handlers::set_api_key))
        .route("/sounds/{effect}", get(handlers::sound_effect))
        .route("/about", get(handlers::about))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
