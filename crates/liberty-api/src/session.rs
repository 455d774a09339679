//! tower-sessions persistence over the `Storage` trait.
//!
//! Rows are keyed by the SHA-256 of the cookie's session id, so the table
//! never holds a usable cookie value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tower_sessions::cookie::SameSite;
use tower_sessions::cookie::time::{Duration, OffsetDateTime};
use tower_sessions::session::{Id, Record};
use tower_sessions::session_store::{self, SessionStore};
use tower_sessions::{Expiry, SessionManagerLayer};
use uuid::Uuid;

use liberty_db::{Storage, StorageResult};
use liberty_types::models::Session;

use crate::state::ApiConfig;

pub const SESSION_COOKIE: &str = "liberty_sid";

/// Holds the signed-in user's id.
pub const USER_ID_KEY: &str = "user_id";
/// Holds the signed OAuth `state` between login and callback.
pub const OAUTH_STATE_KEY: &str = "oauth_state";

pub fn session_id(id: &Id) -> String {
    hex::encode(Sha256::digest(id.to_string().as_bytes()))
}

pub fn session_layer(store: Arc<dyn Storage>, config: &ApiConfig) -> SessionManagerLayer<StorageSessionStore> {
    SessionManagerLayer::new(StorageSessionStore::new(store))
        .with_name(SESSION_COOKIE)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(config.session_ttl.num_seconds())))
        .with_secure(config.cookie_secure)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_path("/")
}

#[derive(Clone)]
pub struct StorageSessionStore {
    store: Arc<dyn Storage>,
}

impl fmt::Debug for StorageSessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSessionStore").finish_non_exhaustive()
    }
}

impl StorageSessionStore {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    async fn run<F, T>(&self, f: F) -> session_store::Result<T>
    where
        F: FnOnce(&dyn Storage) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| session_store::Error::Backend(e.to_string()))?
            .map_err(|e| session_store::Error::Backend(e.to_string()))
    }
}

fn to_row(record: &Record) -> session_store::Result<Session> {
    let data = serde_json::to_value(&record.data).map_err(|e| session_store::Error::Encode(e.to_string()))?;
    let user_id = record
        .data
        .get(USER_ID_KEY)
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok());
    let expires_at = DateTime::<Utc>::from_timestamp(record.expiry_date.unix_timestamp(), record.expiry_date.nanosecond())
        .ok_or_else(|| session_store::Error::Encode("expiry out of range".into()))?;

    Ok(Session { sid: session_id(&record.id), user_id, data, expires_at })
}

fn to_record(id: Id, row: Session) -> session_store::Result<Record> {
    let data: HashMap<String, Value> =
        serde_json::from_value(row.data).map_err(|e| session_store::Error::Decode(e.to_string()))?;
    let nanos = i128::from(row.expires_at.timestamp_micros()) * 1_000;
    let expiry_date =
        OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|e| session_store::Error::Decode(e.to_string()))?;

    Ok(Record { id, data, expiry_date })
}

#[async_trait]
impl SessionStore for StorageSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        loop {
            let sid = session_id(&record.id);
            if self.run(move |s| s.get_session(&sid, Utc::now())).await?.is_none() {
                break;
            }
            record.id = Id::default();
        }
        self.save(record).await
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        let row = to_row(record)?;
        self.run(move |s| s.create_session(&row)).await
    }

    async fn load(&self, id: &Id) -> session_store::Result<Option<Record>> {
        let sid = session_id(id);
        let id = *id;
        self.run(move |s| s.get_session(&sid, Utc::now()))
            .await?
            .map(|row| to_record(id, row))
            .transpose()
    }

    async fn delete(&self, id: &Id) -> session_store::Result<()> {
        let sid = session_id(id);
        self.run(move |s| s.delete_session(&sid)).await
    }
}
