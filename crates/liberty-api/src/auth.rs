//! OAuth2 / OIDC login against the configured identity provider. The
//! signed-in user lives in the tower-sessions session that follows it.

use axum::{Extension, Json, extract::State, response::Redirect};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, warn};

use liberty_types::models::{NewUser, User};

use crate::error::{ApiError, ApiQuery};
use crate::middleware::CurrentUser;
use crate::session::{OAUTH_STATE_KEY, USER_ID_KEY};
use crate::state::{AppState, AppStateInner};

const STATE_TTL_SECS: i64 = 600;

/// 32 random bytes, base64url without padding.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// -- OAuth state --

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    nonce: String,
    exp: usize,
}

fn sign_state(secret: &str) -> Result<String, ApiError> {
    let claims = StateClaims {
        nonce: random_token(),
        exp: (Utc::now().timestamp() + STATE_TTL_SECS) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).map_err(|e| {
        warn!("Failed to sign OAuth state: {}", e);
        ApiError::Internal
    })
}

fn verify_state(secret: &str, token: &str) -> bool {
    decode::<StateClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default()).is_ok()
}

// -- Handlers --

pub async fn login(State(state): State<AppState>, session: Session) -> Result<Redirect, ApiError> {
    let oauth = &state.config.oauth;
    if !oauth.is_configured() {
        return Err(ApiError::NotConfigured("login"));
    }

    let signed = sign_state(&state.config.session_secret)?;
    let url = reqwest::Url::parse_with_params(
        &format!("{}/auth", oauth.issuer.trim_end_matches('/')),
        &[
            ("response_type", "code"),
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("scope", "openid email profile offline_access"),
            ("prompt", "login consent"),
            ("state", signed.as_str()),
        ],
    )
    .map_err(|e| {
        warn!("Invalid OAuth issuer {:?}: {}", oauth.issuer, e);
        ApiError::NotConfigured("login")
    })?;

    session.insert(OAUTH_STATE_KEY, &signed).await?;
    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
}

async fn exchange_code(state: &AppStateInner, code: &str) -> Result<UserInfo, ApiError> {
    let oauth = &state.config.oauth;
    let issuer = oauth.issuer.trim_end_matches('/');

    let resp = state
        .http
        .post(format!("{issuer}/token"))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", oauth.redirect_url.as_str()),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("token exchange: {e}")))?;
    if !resp.status().is_success() {
        return Err(ApiError::Upstream(format!("token exchange returned {}", resp.status())));
    }
    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("token payload: {e}")))?;

    let resp = state
        .http
        .get(format!("{issuer}/me"))
        .bearer_auth(&token.access_token)
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("userinfo: {e}")))?;
    if !resp.status().is_success() {
        return Err(ApiError::Upstream(format!("userinfo returned {}", resp.status())));
    }
    resp.json()
        .await
        .map_err(|e| ApiError::Upstream(format!("userinfo payload: {e}")))
}

pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    ApiQuery(query): ApiQuery<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    let expected: Option<String> = session.remove(OAUTH_STATE_KEY).await?;
    if expected.as_deref() != Some(query.state.as_str()) || !verify_state(&state.config.session_secret, &query.state) {
        return Err(ApiError::BadRequest("invalid oauth state".into()));
    }

    let info = exchange_code(&state, &query.code).await?;
    let is_admin = state.config.admin_provider_ids.iter().any(|id| *id == info.sub);
    let new_user = NewUser {
        provider_id: info.sub,
        email: info.email,
        first_name: info.first_name,
        last_name: info.last_name,
        profile_image_url: info.profile_image_url,
        is_admin,
    };
    let user = state.storage(move |s| s.upsert_user(&new_user)).await?;
    info!("User {} signed in (admin={})", user.id, user.is_admin);

    // Fresh id on privilege change.
    session.cycle_id().await?;
    session.insert(USER_ID_KEY, user.id).await?;
    Ok(Redirect::to("/"))
}

pub async fn logout(session: Session) -> Result<Redirect, ApiError> {
    session.flush().await?;
    Ok(Redirect::to("/"))
}

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn state_is_bound_to_the_secret() {
        let signed = sign_state("s3cret").unwrap();
        assert!(verify_state("s3cret", &signed));
        assert!(!verify_state("other", &signed));
        assert!(!verify_state("s3cret", "garbage"));
    }
}
