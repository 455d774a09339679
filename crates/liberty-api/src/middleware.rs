use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;
use uuid::Uuid;

use liberty_types::models::User;

use crate::error::ApiError;
use crate::session::USER_ID_KEY;
use crate::state::AppState;

/// The signed-in user, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Resolve the session to a user, or 401.
pub async fn require_auth(
    State(state): State<AppState>,
    session: Session,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id: Uuid = session.get(USER_ID_KEY).await?.ok_or(ApiError::Unauthorized)?;
    let user = state
        .storage(move |s| s.get_user(user_id))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Must run inside `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let user = req.extensions().get::<CurrentUser>().ok_or(ApiError::Unauthorized)?;
    if !user.0.is_admin {
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(req).await)
}
