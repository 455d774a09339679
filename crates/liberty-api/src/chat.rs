//! Per-application chat threads.
//!
//! Applicants reach their thread through the unguessable chat token handed
//! out at submission; admins address it by application id. Reading the
//! thread as admin advances the application's read cursor, which is what
//! the unread count is measured against.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use liberty_types::api::{ApplicantView, SendChatMessageRequest};
use liberty_types::models::{ChatMessage, GrantApplication, SenderRole};

use crate::error::{ApiError, ApiJson, ApiPath};
use crate::state::AppState;

async fn by_token(state: &AppState, token: String) -> Result<GrantApplication, ApiError> {
    state
        .storage(move |s| s.get_application_by_token(&token))
        .await?
        .ok_or(ApiError::NotFound("chat"))
}

pub async fn applicant_view(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<ApplicantView>, ApiError> {
    let application = by_token(&state, token).await?;
    Ok(Json(ApplicantView {
        application_id: application.id,
        project_name: application.project_name,
        status: application.status,
        created_at: application.created_at,
    }))
}

pub async fn applicant_messages(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let application = by_token(&state, token).await?;
    let messages = state.storage(move |s| s.list_messages(application.id)).await?;
    Ok(Json(messages))
}

pub async fn applicant_send(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
    ApiJson(req): ApiJson<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let body = req.validate()?;
    let application = by_token(&state, token).await?;
    let message = state
        .storage(move |s| s.create_message(application.id, SenderRole::Applicant, &body))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn admin_messages(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let messages = state
        .storage(move |s| {
            if !s.mark_application_viewed(id, Utc::now())? {
                return Ok(None);
            }
            s.list_messages(id).map(Some)
        })
        .await?
        .ok_or(ApiError::NotFound("grant application"))?;
    Ok(Json(messages))
}

pub async fn admin_send(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<SendChatMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let body = req.validate()?;
    let message = state
        .storage(move |s| s.create_message(id, SenderRole::Admin, &body))
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
