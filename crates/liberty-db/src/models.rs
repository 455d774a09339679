//! Database row types. These map directly to SQLite rows.
//! Distinct from the liberty-types models so column encodings stay in this crate.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Row;
use uuid::Uuid;

use liberty_types::models::{
    ApplicationStatus, ChatMessage, EmailSubscription, Grant, GrantApplication, GrantCategory,
    SenderRole, Session, UnknownLabel, User,
};

use crate::storage::{StorageError, StorageResult};

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the columns store.
pub fn now_micros() -> DateTime<Utc> {
    to_micros(Utc::now())
}

/// Drops sub-microsecond precision, matching what a round trip through `encode_ts` keeps.
pub fn to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub fn decode_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp '{raw}': {e}")))
}

fn decode_opt_ts(raw: Option<&str>) -> StorageResult<Option<DateTime<Utc>>> {
    raw.map(decode_ts).transpose()
}

fn decode_id(raw: &str) -> StorageResult<Uuid> {
    raw.parse()
        .map_err(|e| StorageError::Corrupt(format!("id '{raw}': {e}")))
}

fn decode_label<T: FromStr<Err = UnknownLabel>>(raw: &str) -> StorageResult<T> {
    raw.parse().map_err(|e: UnknownLabel| StorageError::Corrupt(e.to_string()))
}

pub struct UserRow {
    pub id: String,
    pub provider_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub const COLUMNS: &'static str =
        "id, provider_id, email, first_name, last_name, profile_image_url, is_admin, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            profile_image_url: row.get(5)?,
            is_admin: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn into_model(self) -> StorageResult<User> {
        Ok(User {
            id: decode_id(&self.id)?,
            provider_id: self.provider_id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            profile_image_url: self.profile_image_url,
            is_admin: self.is_admin,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

pub struct SessionRow {
    pub sid: String,
    pub user_id: Option<String>,
    pub sess: String,
    pub expire: String,
}

impl SessionRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sid: row.get(0)?,
            user_id: row.get(1)?,
            sess: row.get(2)?,
            expire: row.get(3)?,
        })
    }

    pub fn into_model(self) -> StorageResult<Session> {
        Ok(Session {
            user_id: self.user_id.as_deref().map(decode_id).transpose()?,
            data: serde_json::from_str(&self.sess)
                .map_err(|e| StorageError::Corrupt(format!("session blob: {e}")))?,
            expires_at: decode_ts(&self.expire)?,
            sid: self.sid,
        })
    }
}

pub struct SubscriptionRow {
    pub id: String,
    pub email: String,
    pub created_at: String,
}

impl SubscriptionRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    pub fn into_model(self) -> StorageResult<EmailSubscription> {
        Ok(EmailSubscription {
            id: decode_id(&self.id)?,
            email: self.email,
            created_at: decode_ts(&self.created_at)?,
        })
    }
}

pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CategoryRow {
    pub const COLUMNS: &'static str = "id, name, description, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    pub fn into_model(self) -> StorageResult<GrantCategory> {
        Ok(GrantCategory {
            id: decode_id(&self.id)?,
            name: self.name,
            description: self.description,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

pub struct GrantRow {
    pub id: String,
    pub category_id: String,
    pub title: String,
    pub description: String,
    pub reward: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl GrantRow {
    pub const COLUMNS: &'static str =
        "id, category_id, title, description, reward, status, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            reward: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    pub fn into_model(self) -> StorageResult<Grant> {
        Ok(Grant {
            id: decode_id(&self.id)?,
            category_id: decode_id(&self.category_id)?,
            title: self.title,
            description: self.description,
            reward: self.reward,
            status: decode_label(&self.status)?,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

pub struct ApplicationRow {
    pub id: String,
    pub grant_id: Option<String>,
    pub applicant_name: String,
    pub email: String,
    pub project_name: String,
    pub project_description: String,
    pub requested_amount: Option<String>,
    pub website: Option<String>,
    pub github: Option<String>,
    pub status: String,
    pub chat_token: String,
    pub last_admin_viewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ApplicationRow {
    pub const COLUMNS: &'static str = "a.id, a.grant_id, a.applicant_name, a.email, a.project_name, \
         a.project_description, a.requested_amount, a.website, a.github, a.status, a.chat_token, \
         a.last_admin_viewed_at, a.created_at, a.updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            grant_id: row.get(1)?,
            applicant_name: row.get(2)?,
            email: row.get(3)?,
            project_name: row.get(4)?,
            project_description: row.get(5)?,
            requested_amount: row.get(6)?,
            website: row.get(7)?,
            github: row.get(8)?,
            status: row.get(9)?,
            chat_token: row.get(10)?,
            last_admin_viewed_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    pub fn into_model(self) -> StorageResult<GrantApplication> {
        // Rows written before the status rename may still say "pipeline".
        let status: ApplicationStatus = decode_label(&self.status)?;
        Ok(GrantApplication {
            id: decode_id(&self.id)?,
            grant_id: self.grant_id.as_deref().map(decode_id).transpose()?,
            applicant_name: self.applicant_name,
            email: self.email,
            project_name: self.project_name,
            project_description: self.project_description,
            requested_amount: self.requested_amount,
            website: self.website,
            github: self.github,
            status,
            chat_token: self.chat_token,
            last_admin_viewed_at: decode_opt_ts(self.last_admin_viewed_at.as_deref())?,
            created_at: decode_ts(&self.created_at)?,
            updated_at: decode_ts(&self.updated_at)?,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub application_id: String,
    pub sender: String,
    pub body: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            application_id: row.get(1)?,
            sender: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    pub fn into_model(self) -> StorageResult<ChatMessage> {
        let sender: SenderRole = decode_label(&self.sender)?;
        Ok(ChatMessage {
            id: decode_id(&self.id)?,
            application_id: decode_id(&self.application_id)?,
            sender,
            body: self.body,
            created_at: decode_ts(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T09:59:59.999999Z").unwrap().with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z").unwrap().with_timezone(&Utc);
        assert!(encode_ts(a) < encode_ts(b));
        assert_eq!(decode_ts(&encode_ts(b)).unwrap(), b);
    }

    #[test]
    fn garbage_timestamp_is_corrupt() {
        assert!(matches!(decode_ts("yesterday"), Err(StorageError::Corrupt(_))));
    }
}
