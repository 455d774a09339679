use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use liberty_types::api::{ApplicationQuery, CreateApplicationRequest, CreateApplicationResponse, UpdateStatusRequest};
use liberty_types::models::{ApplicationSummary, GrantApplication};

use crate::auth::random_token;
use crate::email;
use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

pub async fn submit(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<CreateApplicationResponse>), ApiError> {
    let new = req.validate(random_token())?;
    let application = state.storage(move |s| s.create_application(&new)).await?;
    info!("Grant application {} received for '{}'", application.id, application.project_name);

    let link = state.mailer.chat_link(&application);
    state
        .mailer
        .send_in_background(email::application_received(&application, &link));
    if let Some(admin) = state.mailer.config().admin_email.as_deref() {
        state
            .mailer
            .send_in_background(email::admin_new_application(&application, admin));
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateApplicationResponse {
            id: application.id,
            chat_token: application.chat_token,
            status: application.status,
        }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ApplicationQuery>,
) -> Result<Json<Vec<ApplicationSummary>>, ApiError> {
    let summaries = state.storage(move |s| s.list_applications(query.status)).await?;
    Ok(Json(summaries))
}

pub async fn get(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<Json<GrantApplication>, ApiError> {
    state
        .storage(move |s| s.get_application(id))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("grant application"))
}

pub async fn update_status(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> Result<Json<GrantApplication>, ApiError> {
    let status = req.status;
    let application = state
        .storage(move |s| s.update_application_status(id, status))
        .await?
        .ok_or(ApiError::NotFound("grant application"))?;
    info!("Grant application {} moved to {}", id, application.status);

    let link = state.mailer.chat_link(&application);
    state
        .mailer
        .send_in_background(email::status_changed(&application, &link));

    Ok(Json(application))
}

pub async fn delete(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<StatusCode, ApiError> {
    if state.storage(move |s| s.delete_application(id)).await? {
        info!("Grant application {} deleted", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("grant application"))
    }
}
