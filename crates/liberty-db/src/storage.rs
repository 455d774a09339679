use chrono::{DateTime, Utc};
use uuid::Uuid;

use liberty_types::models::{
    ApplicationStatus, ApplicationSummary, CategoryPatch, ChatMessage, EmailSubscription, Grant,
    GrantApplication, GrantCategory, GrantFilter, GrantPatch, NewCategory, NewGrant,
    NewGrantApplication, NewUser, SenderRole, Session, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence boundary for the API. `MemStorage` and `Database` implement
/// the same semantics; handlers only ever see this trait.
///
/// Calls are blocking. Async callers run them on `spawn_blocking`.
pub trait Storage: Send + Sync {
    // -- Users --

    fn upsert_user(&self, user: &NewUser) -> StorageResult<User>;
    fn get_user(&self, id: Uuid) -> StorageResult<Option<User>>;

    // -- Sessions --

    fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Returns `None` for unknown sessions and for sessions expired at `now`.
    fn get_session(&self, sid: &str, now: DateTime<Utc>) -> StorageResult<Option<Session>>;
    fn delete_session(&self, sid: &str) -> StorageResult<()>;
    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    // -- Subscriptions --

    /// `email` must already be normalised. Duplicates are a `Conflict`.
    fn create_subscription(&self, email: &str) -> StorageResult<EmailSubscription>;
    fn list_subscriptions(&self) -> StorageResult<Vec<EmailSubscription>>;

    // -- Categories --

    fn create_category(&self, category: &NewCategory) -> StorageResult<GrantCategory>;
    fn list_categories(&self) -> StorageResult<Vec<GrantCategory>>;
    fn get_category(&self, id: Uuid) -> StorageResult<Option<GrantCategory>>;
    fn update_category(&self, id: Uuid, patch: &CategoryPatch) -> StorageResult<Option<GrantCategory>>;
    /// Deletes the category and its grants.
    fn delete_category(&self, id: Uuid) -> StorageResult<bool>;

    // -- Grants --

    fn create_grant(&self, grant: &NewGrant) -> StorageResult<Grant>;
    fn list_grants(&self, filter: &GrantFilter) -> StorageResult<Vec<Grant>>;
    fn get_grant(&self, id: Uuid) -> StorageResult<Option<Grant>>;
    fn update_grant(&self, id: Uuid, patch: &GrantPatch) -> StorageResult<Option<Grant>>;
    /// Deletes the grant; applications that referenced it keep existing with no grant.
    fn delete_grant(&self, id: Uuid) -> StorageResult<bool>;

    // -- Applications --

    fn create_application(&self, application: &NewGrantApplication) -> StorageResult<GrantApplication>;
    /// Newest first, each with its derived unread count.
    fn list_applications(&self, status: Option<ApplicationStatus>) -> StorageResult<Vec<ApplicationSummary>>;
    fn get_application(&self, id: Uuid) -> StorageResult<Option<GrantApplication>>;
    fn get_application_by_token(&self, chat_token: &str) -> StorageResult<Option<GrantApplication>>;
    fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> StorageResult<Option<GrantApplication>>;
    /// Moves the admin read cursor. Returns `false` for an unknown application.
    fn mark_application_viewed(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool>;
    /// Deletes the application and its chat thread.
    fn delete_application(&self, id: Uuid) -> StorageResult<bool>;

    // -- Chat --

    fn create_message(&self, application_id: Uuid, sender: SenderRole, body: &str) -> StorageResult<ChatMessage>;
    /// Oldest first.
    fn list_messages(&self, application_id: Uuid) -> StorageResult<Vec<ChatMessage>>;
    fn unread_count(&self, application_id: Uuid) -> StorageResult<u64>;
}
