//! Chat and completion handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use llama_engine::{SamplingConfig, SessionHandle};

use crate::{
    error::ServerError,
    models::{ChatRequest, CompletionRequest, GenerationResponse},
    state::AppState,
};

/// `POST /v1/sessions/:handle/chat`
pub async fn chat(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ServerError> {
    let Json(req) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let handle = SessionHandle::new(handle);
    let sampling = req.sampling.apply(SamplingConfig::chat_defaults());
    let text = state
        .run_blocking(move |engine| engine.generate_chat(handle, &req.messages, &sampling))
        .await?;
    Ok(Json(GenerationResponse { text }))
}

/// `POST /v1/sessions/:handle/completion`
pub async fn completion(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
    body: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Json<GenerationResponse>, ServerError> {
    let Json(req) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let handle = SessionHandle::new(handle);
    let sampling = req.sampling.apply(SamplingConfig::completion_defaults());
    let text = state
        .run_blocking(move |engine| engine.generate_completion(handle, &req.prompt, &sampling))
        .await?;
    Ok(Json(GenerationResponse { text }))
}
