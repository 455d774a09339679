use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use liberty_types::models::{
    ApplicationStatus, ApplicationSummary, CategoryPatch, ChatMessage, EmailSubscription, Grant,
    GrantApplication, GrantCategory, GrantFilter, GrantPatch, GrantStatus, NewCategory, NewGrant,
    NewGrantApplication, NewUser, SenderRole, Session, User,
};

use crate::Database;
use crate::models::{
    ApplicationRow, CategoryRow, GrantRow, MessageRow, SessionRow, SubscriptionRow, UserRow, encode_ts, now_micros,
};
use crate::storage::{Storage, StorageError, StorageResult};

/// Turns constraint failures into domain errors: UNIQUE → `Conflict`,
/// FOREIGN KEY → `NotFound(parent)`.
fn map_constraint(err: rusqlite::Error, what: &str, parent: &'static str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ref e, _) = err {
        match e.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return StorageError::Conflict(format!("{what} already exists"));
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StorageError::NotFound(parent),
            _ => {}
        }
    }
    err.into()
}

impl Storage for Database {
    // -- Users --

    fn upsert_user(&self, user: &NewUser) -> StorageResult<User> {
        let now = encode_ts(now_micros());
        self.with_conn_mut(|conn| {
            let sql = format!(
                "INSERT INTO users (id, provider_id, email, first_name, last_name, profile_image_url, is_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(provider_id) DO UPDATE SET
                    email = excluded.email,
                    first_name = excluded.first_name,
                    last_name = excluded.last_name,
                    profile_image_url = excluded.profile_image_url,
                    is_admin = users.is_admin OR excluded.is_admin,
                    updated_at = excluded.updated_at
                 RETURNING {}",
                UserRow::COLUMNS
            );
            let row = conn.query_row(
                &sql,
                params![
                    Uuid::new_v4().to_string(),
                    user.provider_id,
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.profile_image_url,
                    user.is_admin,
                    now,
                ],
                UserRow::from_row,
            )?;
            row.into_model()
        })
    }

    fn get_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE id = ?1", UserRow::COLUMNS);
            conn.query_row(&sql, [id.to_string()], UserRow::from_row)
                .optional()?
                .map(UserRow::into_model)
                .transpose()
        })
    }

    // -- Sessions --

    fn create_session(&self, session: &Session) -> StorageResult<()> {
        let blob = serde_json::to_string(&session.data)
            .map_err(|e| StorageError::Corrupt(format!("session blob: {e}")))?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sessions (sid, user_id, sess, expire) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sid) DO UPDATE SET user_id = excluded.user_id, sess = excluded.sess, expire = excluded.expire",
                params![
                    session.sid,
                    session.user_id.map(|id| id.to_string()),
                    blob,
                    encode_ts(session.expires_at)
                ],
            )
            .map_err(|e| map_constraint(e, "session", "user"))?;
            Ok(())
        })
    }

    fn get_session(&self, sid: &str, now: DateTime<Utc>) -> StorageResult<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT sid, user_id, sess, expire FROM sessions WHERE sid = ?1 AND expire > ?2",
                params![sid, encode_ts(now)],
                SessionRow::from_row,
            )
            .optional()?
            .map(SessionRow::into_model)
            .transpose()
        })
    }

    fn delete_session(&self, sid: &str) -> StorageResult<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM sessions WHERE sid = ?1", [sid])?;
            Ok(())
        })
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE expire <= ?1", [encode_ts(now)])?)
        })
    }

    // -- Subscriptions --

    fn create_subscription(&self, email: &str) -> StorageResult<EmailSubscription> {
        let sub = EmailSubscription {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: now_micros(),
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO email_subscriptions (id, email, created_at) VALUES (?1, ?2, ?3)",
                params![sub.id.to_string(), sub.email, encode_ts(sub.created_at)],
            )
            .map_err(|e| map_constraint(e, "subscription", "subscription"))?;
            Ok(())
        })?;
        Ok(sub)
    }

    fn list_subscriptions(&self) -> StorageResult<Vec<EmailSubscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, created_at FROM email_subscriptions ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([], SubscriptionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(SubscriptionRow::into_model).collect()
        })
    }

    // -- Categories --

    fn create_category(&self, category: &NewCategory) -> StorageResult<GrantCategory> {
        let now = now_micros();
        let created = GrantCategory {
            id: Uuid::new_v4(),
            name: category.name.clone(),
            description: category.description.clone(),
            created_at: now,
            updated_at: now,
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO grant_categories (id, name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![created.id.to_string(), created.name, created.description, encode_ts(now)],
            )
            .map_err(|e| map_constraint(e, "category", "category"))?;
            Ok(())
        })?;
        Ok(created)
    }

    fn list_categories(&self) -> StorageResult<Vec<GrantCategory>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM grant_categories ORDER BY name", CategoryRow::COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], CategoryRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(CategoryRow::into_model).collect()
        })
    }

    fn get_category(&self, id: Uuid) -> StorageResult<Option<GrantCategory>> {
        self.with_conn(|conn| query_category(conn, id))
    }

    fn update_category(&self, id: Uuid, patch: &CategoryPatch) -> StorageResult<Option<GrantCategory>> {
        self.with_conn_mut(|conn| {
            let Some(mut category) = query_category(conn, id)? else {
                return Ok(None);
            };
            if let Some(name) = &patch.name {
                category.name = name.clone();
            }
            if let Some(description) = &patch.description {
                category.description = description.clone();
            }
            category.updated_at = now_micros();

            conn.execute(
                "UPDATE grant_categories SET name = ?2, description = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    id.to_string(),
                    category.name,
                    category.description,
                    encode_ts(category.updated_at)
                ],
            )
            .map_err(|e| map_constraint(e, "category", "category"))?;
            Ok(Some(category))
        })
    }

    fn delete_category(&self, id: Uuid) -> StorageResult<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM grant_categories WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Grants --

    fn create_grant(&self, grant: &NewGrant) -> StorageResult<Grant> {
        let now = now_micros();
        let created = Grant {
            id: Uuid::new_v4(),
            category_id: grant.category_id,
            title: grant.title.clone(),
            description: grant.description.clone(),
            reward: grant.reward.clone(),
            status: grant.status,
            created_at: now,
            updated_at: now,
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO grants (id, category_id, title, description, reward, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    created.id.to_string(),
                    created.category_id.to_string(),
                    created.title,
                    created.description,
                    created.reward,
                    created.status.as_str(),
                    encode_ts(now)
                ],
            )
            .map_err(|e| map_constraint(e, "grant", "grant category"))?;
            Ok(())
        })?;
        Ok(created)
    }

    fn list_grants(&self, filter: &GrantFilter) -> StorageResult<Vec<Grant>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM grants
                 WHERE (?1 IS NULL OR category_id = ?1)
                   AND (?2 OR status != ?3)
                 ORDER BY created_at DESC, rowid DESC",
                GrantRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        filter.category_id.map(|id| id.to_string()),
                        filter.include_closed,
                        GrantStatus::Closed.as_str()
                    ],
                    GrantRow::from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(GrantRow::into_model).collect()
        })
    }

    fn get_grant(&self, id: Uuid) -> StorageResult<Option<Grant>> {
        self.with_conn(|conn| query_grant(conn, id))
    }

    fn update_grant(&self, id: Uuid, patch: &GrantPatch) -> StorageResult<Option<Grant>> {
        self.with_conn_mut(|conn| {
            let Some(mut grant) = query_grant(conn, id)? else {
                return Ok(None);
            };
            if let Some(category_id) = patch.category_id {
                grant.category_id = category_id;
            }
            if let Some(title) = &patch.title {
                grant.title = title.clone();
            }
            if let Some(description) = &patch.description {
                grant.description = description.clone();
            }
            if let Some(reward) = &patch.reward {
                grant.reward = reward.clone();
            }
            if let Some(status) = patch.status {
                grant.status = status;
            }
            grant.updated_at = now_micros();

            conn.execute(
                "UPDATE grants SET category_id = ?2, title = ?3, description = ?4, reward = ?5,
                    status = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    grant.category_id.to_string(),
                    grant.title,
                    grant.description,
                    grant.reward,
                    grant.status.as_str(),
                    encode_ts(grant.updated_at)
                ],
            )
            .map_err(|e| map_constraint(e, "grant", "grant category"))?;
            Ok(Some(grant))
        })
    }

    fn delete_grant(&self, id: Uuid) -> StorageResult<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM grants WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Applications --

    fn create_application(&self, application: &NewGrantApplication) -> StorageResult<GrantApplication> {
        let now = now_micros();
        let created = GrantApplication {
            id: Uuid::new_v4(),
            grant_id: application.grant_id,
            applicant_name: application.applicant_name.clone(),
            email: application.email.clone(),
            project_name: application.project_name.clone(),
            project_description: application.project_description.clone(),
            requested_amount: application.requested_amount.clone(),
            website: application.website.clone(),
            github: application.github.clone(),
            status: ApplicationStatus::Received,
            chat_token: application.chat_token.clone(),
            last_admin_viewed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO grant_applications (id, grant_id, applicant_name, email, project_name,
                    project_description, requested_amount, website, github, status, chat_token,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    created.id.to_string(),
                    created.grant_id.map(|id| id.to_string()),
                    created.applicant_name,
                    created.email,
                    created.project_name,
                    created.project_description,
                    created.requested_amount,
                    created.website,
                    created.github,
                    created.status.as_str(),
                    created.chat_token,
                    encode_ts(now)
                ],
            )
            .map_err(|e| map_constraint(e, "application", "grant"))?;
            Ok(())
        })?;
        Ok(created)
    }

    fn list_applications(&self, status: Option<ApplicationStatus>) -> StorageResult<Vec<ApplicationSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {},
                    (SELECT COUNT(*) FROM chat_messages m
                     WHERE m.application_id = a.id
                       AND m.sender = 'applicant'
                       AND (a.last_admin_viewed_at IS NULL OR m.created_at > a.last_admin_viewed_at))
                 FROM grant_applications a
                 WHERE (?1 IS NULL OR a.status = ?1)
                 ORDER BY a.created_at DESC, a.rowid DESC",
                ApplicationRow::COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([status.map(|s| s.as_str())], |row| {
                    Ok((ApplicationRow::from_row(row)?, row.get::<_, i64>(14)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(row, unread)| {
                    Ok(ApplicationSummary {
                        application: row.into_model()?,
                        unread_count: unread.max(0) as u64,
                    })
                })
                .collect()
        })
    }

    fn get_application(&self, id: Uuid) -> StorageResult<Option<GrantApplication>> {
        self.with_conn(|conn| query_application(conn, "a.id", &id.to_string()))
    }

    fn get_application_by_token(&self, chat_token: &str) -> StorageResult<Option<GrantApplication>> {
        self.with_conn(|conn| query_application(conn, "a.chat_token", chat_token))
    }

    fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> StorageResult<Option<GrantApplication>> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE grant_applications SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.to_string(), status.as_str(), encode_ts(now_micros())],
            )?;
            if n == 0 {
                return Ok(None);
            }
            query_application(conn, "a.id", &id.to_string())
        })
    }

    fn mark_application_viewed(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE grant_applications SET last_admin_viewed_at = ?2 WHERE id = ?1",
                params![id.to_string(), encode_ts(at)],
            )?;
            Ok(n > 0)
        })
    }

    fn delete_application(&self, id: Uuid) -> StorageResult<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM grant_applications WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Chat --

    fn create_message(&self, application_id: Uuid, sender: SenderRole, body: &str) -> StorageResult<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            application_id,
            sender,
            body: body.to_string(),
            created_at: now_micros(),
        };
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, application_id, sender, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.to_string(),
                    application_id.to_string(),
                    sender.as_str(),
                    message.body,
                    encode_ts(message.created_at)
                ],
            )
            .map_err(|e| map_constraint(e, "message", "grant application"))?;
            Ok(())
        })?;
        Ok(message)
    }

    fn list_messages(&self, application_id: Uuid) -> StorageResult<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, application_id, sender, body, created_at
                 FROM chat_messages
                 WHERE application_id = ?1
                 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([application_id.to_string()], MessageRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(MessageRow::into_model).collect()
        })
    }

    fn unread_count(&self, application_id: Uuid) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM chat_messages m
                 JOIN grant_applications a ON a.id = m.application_id
                 WHERE m.application_id = ?1
                   AND m.sender = 'applicant'
                   AND (a.last_admin_viewed_at IS NULL OR m.created_at > a.last_admin_viewed_at)",
                [application_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn query_category(conn: &Connection, id: Uuid) -> StorageResult<Option<GrantCategory>> {
    let sql = format!("SELECT {} FROM grant_categories WHERE id = ?1", CategoryRow::COLUMNS);
    conn.query_row(&sql, [id.to_string()], CategoryRow::from_row)
        .optional()?
        .map(CategoryRow::into_model)
        .transpose()
}

fn query_grant(conn: &Connection, id: Uuid) -> StorageResult<Option<Grant>> {
    let sql = format!("SELECT {} FROM grants WHERE id = ?1", GrantRow::COLUMNS);
    conn.query_row(&sql, [id.to_string()], GrantRow::from_row)
        .optional()?
        .map(GrantRow::into_model)
        .transpose()
}

/// `column` is one of the fixed lookup columns, never user input.
fn query_application(conn: &Connection, column: &str, value: &str) -> StorageResult<Option<GrantApplication>> {
    let sql = format!(
        "SELECT {} FROM grant_applications a WHERE {} = ?1",
        ApplicationRow::COLUMNS,
        column
    );
    conn.query_row(&sql, [value], ApplicationRow::from_row)
        .optional()?
        .map(ApplicationRow::into_model)
        .transpose()
}
