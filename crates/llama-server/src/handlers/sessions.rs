//! Session lifecycle, token counting and templating handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use llama_engine::{SessionHandle, SessionSpec};

use crate::{
    error::ServerError,
    models::{
        CountTokensRequest, CountTokensResponse, CreateSessionRequest, CreateSessionResponse,
        TemplateRequest, TemplateResponse,
    },
    state::AppState,
};

/// `POST /v1/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ServerError> {
    let Json(req) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let spec = SessionSpec::new(
        req.model_path
            .or_else(|| state.config.default_model.clone())
            .unwrap_or_default(),
        req.context_size.unwrap_or(state.config.default_context_size),
        req.batch_size.unwrap_or(state.config.default_batch_size),
    );
    let (context_size, batch_size) = (spec.context_size, spec.batch_size);
    let handle = state
        .run_blocking(move |engine| engine.create_session(&spec))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            handle,
            context_size,
            batch_size,
        }),
    ))
}

/// `POST /v1/sessions/:handle/tokens`
pub async fn count_tokens(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
    body: Result<Json<CountTokensRequest>, JsonRejection>,
) -> Result<Json<CountTokensResponse>, ServerError> {
    let Json(req) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let handle = SessionHandle::new(handle);
    let count = state
        .run_blocking(move |engine| engine.count_tokens(handle, &req.text))
        .await?;
    Ok(Json(CountTokensResponse { count }))
}

/// `POST /v1/sessions/:handle/template`
pub async fn apply_template(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
    body: Result<Json<TemplateRequest>, JsonRejection>,
) -> Result<Json<TemplateResponse>, ServerError> {
    let Json(req) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let handle = SessionHandle::new(handle);
    let prompt = state
        .run_blocking(move |engine| engine.apply_template(handle, &req.messages))
        .await?;
    Ok(Json(TemplateResponse { prompt }))
}

/// `DELETE /v1/sessions/:handle`
pub async fn release_session(
    State(state): State<AppState>,
    Path(handle): Path<u64>,
) -> Result<StatusCode, ServerError> {
    let handle = SessionHandle::new(handle);
    state
        .run_blocking(move |engine| engine.release_session(handle))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
