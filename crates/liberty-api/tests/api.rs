use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_sessions::SessionStore;
use tower_sessions::cookie::time::{Duration, OffsetDateTime};
use tower_sessions::session::{Id, Record};

use liberty_api::email::MailerConfig;
use liberty_api::session::{SESSION_COOKIE, StorageSessionStore, USER_ID_KEY};
use liberty_api::state::OAuthConfig;
use liberty_api::{ApiConfig, AppState, AppStateInner, build_router};
use liberty_db::MemStorage;
use liberty_types::models::NewUser;

fn config() -> ApiConfig {
    ApiConfig { session_secret: "test-secret".into(), cookie_secure: false, ..Default::default() }
}

fn state_with(config: ApiConfig) -> AppState {
    AppStateInner::new(Arc::new(MemStorage::new()), config, MailerConfig::default()).unwrap()
}

fn state() -> AppState {
    state_with(config())
}

fn oauth_client(issuer: &str) -> OAuthConfig {
    OAuthConfig {
        issuer: issuer.into(),
        client_id: "liberty".into(),
        client_secret: "shh".into(),
        redirect_url: "http://localhost:5000/auth/replit/callback".into(),
    }
}

/// Signs in a fresh user and returns the `Cookie` header value.
async fn sign_in(state: &AppState, provider_id: &str, is_admin: bool) -> String {
    let user = state
        .store
        .upsert_user(&NewUser { provider_id: provider_id.into(), is_admin, ..Default::default() })
        .unwrap();
    let mut record = Record {
        id: Id::default(),
        data: HashMap::from([(USER_ID_KEY.to_string(), json!(user.id))]),
        expiry_date: OffsetDateTime::now_utc() + Duration::hours(1),
    };
    StorageSessionStore::new(state.store.clone()).create(&mut record).await.unwrap();
    format!("{SESSION_COOKIE}={}", record.id)
}

/// The `name=value` pair of the session cookie a response sets.
fn set_session_cookie(resp: &axum::response::Response) -> Option<String> {
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(SESSION_COOKIE))
        .and_then(|v| v.split(';').next())
        .map(String::from)
}

/// Send a request and return (status, parsed JSON body or `Null`).
async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>, cookie: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn application_payload(project: &str) -> Value {
    json!({
        "applicantName": "Satoshi",
        "email": "satoshi@example.org",
        "projectName": project,
        "projectDescription": "A peer-to-peer electronic cash system",
        "github": "https://github.com/bitcoin/bitcoin"
    })
}

#[tokio::test]
async fn health_is_public() {
    let (status, body) = send(&state(), "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn subscribing_twice_conflicts() {
    let state = state();
    let (status, body) = send(&state, "POST", "/api/subscribe", Some(json!({ "email": "Hodl@Example.org " })), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "hodl@example.org");

    let (status, body) = send(&state, "POST", "/api/subscribe", Some(json!({ "email": "hodl@example.org" })), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "email already subscribed");
}

#[tokio::test]
async fn invalid_email_names_the_field() {
    let (status, body) = send(&state(), "POST", "/api/subscribe", Some(json!({ "email": "not-an-email" })), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "email");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (status, body) = send(&state(), "POST", "/api/grant-applications", Some(json!({ "email": 5 })), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn admin_routes_require_an_admin_session() {
    let state = state();
    let (status, _) = send(&state, "GET", "/api/admin/grant-applications", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&state, "GET", "/api/admin/grant-applications", None, Some("liberty_sid=bogus")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let member = sign_in(&state, "100", false).await;
    let (status, _) = send(&state, "GET", "/api/admin/grant-applications", None, Some(&member)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, me) = send(&state, "GET", "/api/me", None, Some(&member)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["providerId"], "100");
    assert_eq!(me["isAdmin"], false);
}

#[tokio::test]
async fn chat_thread_tracks_unread_messages() {
    let state = state();
    let admin = sign_in(&state, "1", true).await;

    let (status, created) = send(&state, "POST", "/api/grant-applications", Some(application_payload("Bitcoin")), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "received");
    let token = created["chatToken"].as_str().unwrap().to_string();
    let id = created["id"].as_str().unwrap().to_string();

    let (status, view) = send(&state, "GET", &format!("/api/chat/{token}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["projectName"], "Bitcoin");

    let (status, msg) = send(&state, "POST", &format!("/api/chat/{token}/messages"), Some(json!({ "body": "gm" })), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(msg["sender"], "applicant");

    let (_, listed) = send(&state, "GET", "/api/admin/grant-applications", None, Some(&admin)).await;
    assert_eq!(listed[0]["id"], id.as_str());
    assert_eq!(listed[0]["unreadCount"], 1);

    let (status, thread) = send(&state, "GET", &format!("/api/admin/grant-applications/{id}/messages"), None, Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thread.as_array().unwrap().len(), 1);

    let (status, reply) = send(
        &state,
        "POST",
        &format!("/api/admin/grant-applications/{id}/messages"),
        Some(json!({ "body": "gm, looking now" })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["sender"], "admin");

    let (_, listed) = send(&state, "GET", "/api/admin/grant-applications", None, Some(&admin)).await;
    assert_eq!(listed[0]["unreadCount"], 0);

    let (_, thread) = send(&state, "GET", &format!("/api/chat/{token}/messages"), None, None).await;
    let bodies: Vec<&str> = thread.as_array().unwrap().iter().map(|m| m["body"].as_str().unwrap()).collect();
    assert_eq!(bodies, ["gm", "gm, looking now"]);
}

#[tokio::test]
async fn unknown_chat_token_is_not_found() {
    let (status, _) = send(&state(), "GET", "/api/chat/nope/messages", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_updates_accept_the_pipeline_alias() {
    let state = state();
    let admin = sign_in(&state, "1", true).await;
    let (_, created) = send(&state, "POST", "/api/grant-applications", Some(application_payload("Lightning")), None).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, updated) = send(
        &state,
        "PATCH",
        &format!("/api/admin/grant-applications/{id}/status"),
        Some(json!({ "status": "pipeline" })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "in-review");

    let (_, filtered) = send(&state, "GET", "/api/admin/grant-applications?status=in-review", None, Some(&admin)).await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);
    let (_, filtered) = send(&state, "GET", "/api/admin/grant-applications?status=granted", None, Some(&admin)).await;
    assert!(filtered.as_array().unwrap().is_empty());

    let (status, _) = send(&state, "DELETE", &format!("/api/admin/grant-applications/{id}"), None, Some(&admin)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&state, "GET", &format!("/api/admin/grant-applications/{id}"), None, Some(&admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn grants_are_managed_by_admins_and_listed_publicly() {
    let state = state();
    let admin = sign_in(&state, "1", true).await;

    let (status, category) = send(
        &state,
        "POST",
        "/api/admin/grant-categories",
        Some(json!({ "name": "Infrastructure" })),
        Some(&admin),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let category_id = category["id"].as_str().unwrap().to_string();

    for (title, status) in [("Relay", "featured"), ("Archive", "closed")] {
        let (code, _) = send(
            &state,
            "POST",
            "/api/admin/grants",
            Some(json!({ "categoryId": category_id, "title": title, "description": "Run it", "status": status })),
            Some(&admin),
        )
        .await;
        assert_eq!(code, StatusCode::CREATED);
    }

    let (_, public) = send(&state, "GET", &format!("/api/grants?categoryId={category_id}"), None, None).await;
    let titles: Vec<&str> = public.as_array().unwrap().iter().map(|g| g["title"].as_str().unwrap()).collect();
    assert_eq!(titles, ["Relay"]);

    let (_, all) = send(&state, "GET", "/api/admin/grants", None, Some(&admin)).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (status, _) = send(&state, "DELETE", &format!("/api/admin/grant-categories/{category_id}"), None, Some(&admin)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, public) = send(&state, "GET", "/api/grants", None, None).await;
    assert!(public.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn calculator_applies_the_threshold() {
    let state = state();
    let (status, body) = send(&state, "GET", "/api/calculator?sats=250000", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["eligible"], true);
    assert_eq!(body["tokens"], 250_000);
    assert_eq!(body["minBalanceSats"], 100_000);

    let (_, body) = send(&state, "GET", "/api/calculator?sats=99999", None, None).await;
    assert_eq!(body["eligible"], false);
    assert_eq!(body["tokens"], 0);
}

#[tokio::test]
async fn malformed_addresses_never_reach_upstream() {
    let (status, _) = send(&state(), "GET", "/api/eligibility/not-an-address", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_without_oauth_client_is_unavailable() {
    let (status, _) = send(&state(), "GET", "/auth/replit", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let state = state();
    let cookie = sign_in(&state, "9", false).await;

    let (status, _) = send(&state, "GET", "/auth/logout", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::SEE_OTHER);

    let (status, _) = send(&state, "GET", "/api/me", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_query_is_a_json_bad_request() {
    let (status, body) = send(&state(), "GET", "/api/calculator?sats=abc", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("sats"));

    let (status, body) = send(&state(), "GET", "/api/calculator", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn malformed_path_id_is_a_json_bad_request() {
    let state = state();
    let admin = sign_in(&state, "1", true).await;

    let (status, body) = send(&state, "GET", "/api/admin/grant-applications/not-a-uuid", None, Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&state, "DELETE", "/api/admin/grants/42", None, Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn checksum_failures_never_reach_upstream() {
    for address in ["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb", "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdp"] {
        let (status, body) = send(&state(), "GET", &format!("/api/eligibility/{address}"), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "not a valid bitcoin address");
    }
}

#[tokio::test]
async fn cors_only_admits_the_public_site() {
    let state = state();
    let with_origin = |origin: &str| {
        Request::builder()
            .method("GET")
            .uri("/api/health")
            .header(header::ORIGIN, origin)
            .body(Body::empty())
            .unwrap()
    };

    let resp = build_router(state.clone()).oneshot(with_origin("https://evil.example")).await.unwrap();
    assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

    let resp = build_router(state).oneshot(with_origin("http://localhost:5000")).await.unwrap();
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:5000");
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}

#[tokio::test]
async fn unparsable_issuer_is_a_configuration_error() {
    let state = state_with(ApiConfig { oauth: oauth_client("not a url"), ..config() });
    let (status, body) = send(&state, "GET", "/auth/replit", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "login is not configured");
}

#[tokio::test]
async fn login_binds_the_oauth_state_to_the_session() {
    let state = state_with(ApiConfig { oauth: oauth_client("https://id.example/oidc"), ..config() });

    let request = Request::builder().uri("/auth/replit").body(Body::empty()).unwrap();
    let resp = build_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let location = resp.headers()[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with("https://id.example/oidc/auth?"));
    assert!(location.contains("state="));
    let cookie = set_session_cookie(&resp).expect("login sets a session cookie");

    // A state that was never issued to this session is refused.
    let (status, body) = send(&state, "GET", "/auth/replit/callback?code=abc&state=forged", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid oauth state");

    let (status, _) = send(&state, "GET", "/auth/replit/callback?code=abc", None, Some(&cookie)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
