use axum::{Json, extract::State, http::StatusCode};
use tracing::info;

use liberty_types::api::SubscribeRequest;
use liberty_types::models::EmailSubscription;

use crate::email;
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

pub async fn subscribe(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SubscribeRequest>,
) -> Result<(StatusCode, Json<EmailSubscription>), ApiError> {
    let address = req.validate()?;

    let subscription = state
        .storage(move |s| s.create_subscription(&address))
        .await
        .map_err(|e| match e {
            ApiError::Conflict(_) => ApiError::Conflict("email already subscribed".into()),
            other => other,
        })?;
    info!("New subscriber {}", subscription.id);

    state
        .mailer
        .send_in_background(email::subscription_confirmation(&subscription.email));

    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<EmailSubscription>>, ApiError> {
    let subscriptions = state.storage(|s| s.list_subscriptions()).await?;
    Ok(Json(subscriptions))
}
