use axum::{
    Json, Router,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    middleware,
    routing::{get, patch, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::middleware::{require_admin, require_auth};
use crate::session::session_layer;
use crate::state::AppState;
use crate::{applications, auth, chat, eligibility, grants, market, subscriptions};

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Credentialed cross-origin requests are only honoured from the public site.
fn cors_layer(site_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let origin = reqwest::Url::parse(site_url)
        .ok()
        .map(|url| url.origin())
        .filter(|origin| origin.is_tuple())
        .and_then(|origin| HeaderValue::from_str(&origin.ascii_serialization()).ok());
    match origin {
        Some(origin) => cors.allow_origin(origin).allow_credentials(true),
        None => {
            warn!("Public URL {:?} has no usable origin, cross-origin requests are refused", site_url);
            cors
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/subscriptions", get(subscriptions::list))
        .route("/grant-categories", get(grants::list_categories).post(grants::create_category))
        .route(
            "/grant-categories/{id}",
            patch(grants::update_category).delete(grants::delete_category),
        )
        .route("/grants", get(grants::list_all).post(grants::create_grant))
        .route("/grants/{id}", patch(grants::update_grant).delete(grants::delete_grant))
        .route("/grant-applications", get(applications::list))
        .route(
            "/grant-applications/{id}",
            get(applications::get).delete(applications::delete),
        )
        .route("/grant-applications/{id}/status", patch(applications::update_status))
        .route(
            "/grant-applications/{id}/messages",
            get(chat::admin_messages).post(chat::admin_send),
        )
        // Layers run outside-in: auth first, then the admin check.
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let signed_in = Router::new()
        .route("/api/me", get(auth::me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = cors_layer(&state.mailer.config().site_url);
    let sessions = session_layer(state.store.clone(), &state.config);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/subscribe", post(subscriptions::subscribe))
        .route("/api/grant-applications", post(applications::submit))
        .route("/api/grants", get(grants::list_public))
        .route("/api/grant-categories", get(grants::list_categories))
        .route("/api/chat/{token}", get(chat::applicant_view))
        .route(
            "/api/chat/{token}/messages",
            get(chat::applicant_messages).post(chat::applicant_send),
        )
        .route("/api/eligibility/{address}", get(eligibility::check))
        .route("/api/calculator", get(eligibility::calculate))
        .route("/api/price", get(market::btc_price))
        .route("/auth/replit", get(auth::login))
        .route("/auth/replit/callback", get(auth::callback))
        .route("/auth/logout", get(auth::logout))
        .merge(signed_in)
        .nest("/api/admin", admin)
        .layer(sessions)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
