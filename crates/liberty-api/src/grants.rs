use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use tracing::info;
use uuid::Uuid;

use liberty_types::api::{
    CreateCategoryRequest, CreateGrantRequest, GrantQuery, UpdateCategoryRequest, UpdateGrantRequest,
};
use liberty_types::models::{Grant, GrantCategory, GrantFilter};

use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

// -- Public --

/// Open, featured and high-priority grants.
pub async fn list_public(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GrantQuery>,
) -> Result<Json<Vec<Grant>>, ApiError> {
    let filter = GrantFilter { category_id: query.category_id, include_closed: false };
    let grants = state.storage(move |s| s.list_grants(&filter)).await?;
    Ok(Json(grants))
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<GrantCategory>>, ApiError> {
    let categories = state.storage(|s| s.list_categories()).await?;
    Ok(Json(categories))
}

// -- Admin: categories --

pub async fn create_category(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<GrantCategory>), ApiError> {
    let new = req.validate()?;
    let category = state.storage(move |s| s.create_category(&new)).await?;
    info!("Created grant category '{}'", category.name);
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateCategoryRequest>,
) -> Result<Json<GrantCategory>, ApiError> {
    let patch = req.validate()?;
    state
        .storage(move |s| s.update_category(id, &patch))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("grant category"))
}

/// Also deletes the category's grants.
pub async fn delete_category(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<StatusCode, ApiError> {
    if state.storage(move |s| s.delete_category(id)).await? {
        info!("Deleted grant category {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("grant category"))
    }
}

// -- Admin: grants --

/// Every grant, closed ones included unless `includeClosed=false`.
pub async fn list_all(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GrantQuery>,
) -> Result<Json<Vec<Grant>>, ApiError> {
    let filter = GrantFilter { category_id: query.category_id, include_closed: query.include_closed.unwrap_or(true) };
    let grants = state.storage(move |s| s.list_grants(&filter)).await?;
    Ok(Json(grants))
}

pub async fn create_grant(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateGrantRequest>,
) -> Result<(StatusCode, Json<Grant>), ApiError> {
    let new = req.validate()?;
    let grant = state.storage(move |s| s.create_grant(&new)).await?;
    info!("Created grant '{}' ({})", grant.title, grant.status);
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn update_grant(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateGrantRequest>,
) -> Result<Json<Grant>, ApiError> {
    let patch = req.validate()?;
    state
        .storage(move |s| s.update_grant(id, &patch))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("grant"))
}

pub async fn delete_grant(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<StatusCode, ApiError> {
    if state.storage(move |s| s.delete_grant(id)).await? {
        info!("Deleted grant {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("grant"))
    }
}
