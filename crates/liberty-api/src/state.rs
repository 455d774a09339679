use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::error;

use liberty_db::{Storage, StorageResult};
use liberty_types::api::PriceResponse;

use crate::eligibility::EligibilityRules;
use crate::email::{Mailer, MailerConfig};
use crate::error::ApiError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

pub type AppState = Arc<AppStateInner>;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

impl OAuthConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.redirect_url.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Signs the OAuth `state` parameter.
    pub session_secret: String,
    pub session_ttl: chrono::Duration,
    pub cookie_secure: bool,
    pub oauth: OAuthConfig,
    /// Identity-provider subject ids promoted to admin on login.
    pub admin_provider_ids: Vec<String>,
    pub eligibility: EligibilityRules,
    pub balance_api: String,
    pub price_api: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            session_ttl: chrono::Duration::hours(168),
            cookie_secure: true,
            oauth: OAuthConfig {
                issuer: "https://replit.com/oidc".into(),
                client_id: String::new(),
                client_secret: String::new(),
                redirect_url: String::new(),
            },
            admin_provider_ids: Vec::new(),
            eligibility: EligibilityRules::default(),
            balance_api: "https://blockchain.info".into(),
            price_api: "https://api.coingecko.com/api/v3".into(),
        }
    }
}

pub struct AppStateInner {
    pub store: Arc<dyn Storage>,
    pub config: ApiConfig,
    pub mailer: Mailer,
    pub http: reqwest::Client,
    pub price_cache: RwLock<Option<PriceResponse>>,
}

impl AppStateInner {
    pub fn new(store: Arc<dyn Storage>, config: ApiConfig, mail: MailerConfig) -> anyhow::Result<AppState> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .user_agent(concat!("liberty-api/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Arc::new(Self {
            store,
            config,
            mailer: Mailer::new(http.clone(), mail),
            http,
            price_cache: RwLock::new(None),
        }))
    }

    /// Runs a blocking storage call off the async runtime.
    pub async fn storage<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&dyn Storage) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal
            })?
            .map_err(ApiError::from)
    }
}
