//! Map-backed store for development and tests. Same semantics as `Database`,
//! nothing is persisted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use liberty_types::models::{
    self, ApplicationStatus, ApplicationSummary, CategoryPatch, ChatMessage, EmailSubscription, Grant,
    GrantApplication, GrantCategory, GrantFilter, GrantPatch, GrantStatus, NewCategory, NewGrant,
    NewGrantApplication, NewUser, SenderRole, Session, User,
};

use crate::models::{now_micros, to_micros};
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Default)]
struct MemInner {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>,
    // Vecs keep insertion order, which breaks timestamp ties the same way rowid does.
    subscriptions: Vec<EmailSubscription>,
    categories: Vec<GrantCategory>,
    grants: Vec<Grant>,
    applications: Vec<GrantApplication>,
    messages: Vec<ChatMessage>,
}

impl MemInner {
    fn application_mut(&mut self, id: Uuid) -> Option<&mut GrantApplication> {
        self.applications.iter_mut().find(|a| a.id == id)
    }

    fn unread(&self, application: &GrantApplication) -> u64 {
        models::unread_count(
            self.messages.iter().filter(|m| m.application_id == application.id),
            application.last_admin_viewed_at,
        )
    }
}

#[derive(Default)]
pub struct MemStorage {
    inner: Mutex<MemInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, MemInner>> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

/// Newest first; ties keep the most recently inserted first.
fn newest_first<T: Clone>(items: &[T], created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut out: Vec<T> = items.iter().rev().cloned().collect();
    out.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    out
}

impl Storage for MemStorage {
    // -- Users --

    fn upsert_user(&self, user: &NewUser) -> StorageResult<User> {
        let mut inner = self.lock()?;
        let now = now_micros();

        if let Some(existing) = inner.users.values_mut().find(|u| u.provider_id == user.provider_id) {
            existing.email = user.email.clone();
            existing.first_name = user.first_name.clone();
            existing.last_name = user.last_name.clone();
            existing.profile_image_url = user.profile_image_url.clone();
            existing.is_admin |= user.is_admin;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let created = User {
            id: Uuid::new_v4(),
            provider_id: user.provider_id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_image_url: user.profile_image_url.clone(),
            is_admin: user.is_admin,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    fn get_user(&self, id: Uuid) -> StorageResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    // -- Sessions --

    fn create_session(&self, session: &Session) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if let Some(user_id) = session.user_id {
            if !inner.users.contains_key(&user_id) {
                return Err(StorageError::NotFound("user"));
            }
        }
        let stored = Session { expires_at: to_micros(session.expires_at), ..session.clone() };
        inner.sessions.insert(stored.sid.clone(), stored);
        Ok(())
    }

    fn get_session(&self, sid: &str, now: DateTime<Utc>) -> StorageResult<Option<Session>> {
        Ok(self
            .lock()?
            .sessions
            .get(sid)
            .filter(|s| s.expires_at > to_micros(now))
            .cloned())
    }

    fn delete_session(&self, sid: &str) -> StorageResult<()> {
        self.lock()?.sessions.remove(sid);
        Ok(())
    }

    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.lock()?;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.expires_at > to_micros(now));
        Ok(before - inner.sessions.len())
    }

    // -- Subscriptions --

    fn create_subscription(&self, email: &str) -> StorageResult<EmailSubscription> {
        let mut inner = self.lock()?;
        if inner.subscriptions.iter().any(|s| s.email == email) {
            return Err(StorageError::Conflict("subscription already exists".into()));
        }
        let sub = EmailSubscription {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: now_micros(),
        };
        inner.subscriptions.push(sub.clone());
        Ok(sub)
    }

    fn list_subscriptions(&self) -> StorageResult<Vec<EmailSubscription>> {
        Ok(newest_first(&self.lock()?.subscriptions, |s| s.created_at))
    }

    // -- Categories --

    fn create_category(&self, category: &NewCategory) -> StorageResult<GrantCategory> {
        let mut inner = self.lock()?;
        if inner.categories.iter().any(|c| c.name == category.name) {
            return Err(StorageError::Conflict("category already exists".into()));
        }
        let now = now_micros();
        let created = GrantCategory {
            id: Uuid::new_v4(),
            name: category.name.clone(),
            description: category.description.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.categories.push(created.clone());
        Ok(created)
    }

    fn list_categories(&self) -> StorageResult<Vec<GrantCategory>> {
        let mut categories = self.lock()?.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    fn get_category(&self, id: Uuid) -> StorageResult<Option<GrantCategory>> {
        Ok(self.lock()?.categories.iter().find(|c| c.id == id).cloned())
    }

    fn update_category(&self, id: Uuid, patch: &CategoryPatch) -> StorageResult<Option<GrantCategory>> {
        let mut inner = self.lock()?;
        if let Some(name) = &patch.name {
            if inner.categories.iter().any(|c| c.id != id && &c.name == name) {
                return Err(StorageError::Conflict("category already exists".into()));
            }
        }
        let Some(category) = inner.categories.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            category.name = name.clone();
        }
        if let Some(description) = &patch.description {
            category.description = description.clone();
        }
        category.updated_at = now_micros();
        Ok(Some(category.clone()))
    }

    fn delete_category(&self, id: Uuid) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        let before = inner.categories.len();
        inner.categories.retain(|c| c.id != id);
        if inner.categories.len() == before {
            return Ok(false);
        }

        let removed: Vec<Uuid> = inner
            .grants
            .iter()
            .filter(|g| g.category_id == id)
            .map(|g| g.id)
            .collect();
        inner.grants.retain(|g| g.category_id != id);
        for application in &mut inner.applications {
            if application.grant_id.is_some_and(|g| removed.contains(&g)) {
                application.grant_id = None;
            }
        }
        Ok(true)
    }

    // -- Grants --

    fn create_grant(&self, grant: &NewGrant) -> StorageResult<Grant> {
        let mut inner = self.lock()?;
        if !inner.categories.iter().any(|c| c.id == grant.category_id) {
            return Err(StorageError::NotFound("grant category"));
        }
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
        inner.grants.push(created.clone());
        Ok(created)
    }

    fn list_grants(&self, filter: &GrantFilter) -> StorageResult<Vec<Grant>> {
        let inner = self.lock()?;
        let matching: Vec<Grant> = inner
            .grants
            .iter()
            .filter(|g| filter.category_id.is_none_or(|c| g.category_id == c))
            .filter(|g| filter.include_closed || g.status != GrantStatus::Closed)
            .cloned()
            .collect();
        Ok(newest_first(&matching, |g| g.created_at))
    }

    fn get_grant(&self, id: Uuid) -> StorageResult<Option<Grant>> {
        Ok(self.lock()?.grants.iter().find(|g| g.id == id).cloned())
    }

    fn update_grant(&self, id: Uuid, patch: &GrantPatch) -> StorageResult<Option<Grant>> {
        let mut inner = self.lock()?;
        if let Some(category_id) = patch.category_id {
            if !inner.categories.iter().any(|c| c.id == category_id) {
                return Err(StorageError::NotFound("grant category"));
            }
        }
        let Some(grant) = inner.grants.iter_mut().find(|g| g.id == id) else {
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
        Ok(Some(grant.clone()))
    }

    fn delete_grant(&self, id: Uuid) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        let before = inner.grants.len();
        inner.grants.retain(|g| g.id != id);
        if inner.grants.len() == before {
            return Ok(false);
        }
        for application in &mut inner.applications {
            if application.grant_id == Some(id) {
                application.grant_id = None;
            }
        }
        Ok(true)
    }

    // -- Applications --

    fn create_application(&self, application: &NewGrantApplication) -> StorageResult<GrantApplication> {
        let mut inner = self.lock()?;
        if let Some(grant_id) = application.grant_id {
            if !inner.grants.iter().any(|g| g.id == grant_id) {
                return Err(StorageError::NotFound("grant"));
            }
        }
        if inner.applications.iter().any(|a| a.chat_token == application.chat_token) {
            return Err(StorageError::Conflict("application already exists".into()));
        }

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
        inner.applications.push(created.clone());
        Ok(created)
    }

    fn list_applications(&self, status: Option<ApplicationStatus>) -> StorageResult<Vec<ApplicationSummary>> {
        let inner = self.lock()?;
        let matching: Vec<GrantApplication> = inner
            .applications
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();

        Ok(newest_first(&matching, |a| a.created_at)
            .into_iter()
            .map(|application| ApplicationSummary {
                unread_count: inner.unread(&application),
                application,
            })
            .collect())
    }

    fn get_application(&self, id: Uuid) -> StorageResult<Option<GrantApplication>> {
        Ok(self.lock()?.applications.iter().find(|a| a.id == id).cloned())
    }

    fn get_application_by_token(&self, chat_token: &str) -> StorageResult<Option<GrantApplication>> {
        Ok(self
            .lock()?
            .applications
            .iter()
            .find(|a| a.chat_token == chat_token)
            .cloned())
    }

    fn update_application_status(
        &self,
        id: Uuid,
        status: ApplicationStatus,
    ) -> StorageResult<Option<GrantApplication>> {
        let mut inner = self.lock()?;
        Ok(inner.application_mut(id).map(|a| {
            a.status = status;
            a.updated_at = now_micros();
            a.clone()
        }))
    }

    fn mark_application_viewed(&self, id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner
            .application_mut(id)
            .map(|a| a.last_admin_viewed_at = Some(to_micros(at)))
            .is_some())
    }

    fn delete_application(&self, id: Uuid) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        let before = inner.applications.len();
        inner.applications.retain(|a| a.id != id);
        if inner.applications.len() == before {
            return Ok(false);
        }
        inner.messages.retain(|m| m.application_id != id);
        Ok(true)
    }

    // -- Chat --

    fn create_message(&self, application_id: Uuid, sender: SenderRole, body: &str) -> StorageResult<ChatMessage> {
        let mut inner = self.lock()?;
        if !inner.applications.iter().any(|a| a.id == application_id) {
            return Err(StorageError::NotFound("grant application"));
        }
        let message = ChatMessage {
            id: Uuid::new_v4(),
            application_id,
            sender,
            body: body.to_string(),
            created_at: now_micros(),
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    fn list_messages(&self, application_id: Uuid) -> StorageResult<Vec<ChatMessage>> {
        let inner = self.lock()?;
        let mut thread: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.application_id == application_id)
            .cloned()
            .collect();
        thread.sort_by_key(|m| m.created_at);
        Ok(thread)
    }

    fn unread_count(&self, application_id: Uuid) -> StorageResult<u64> {
        let inner = self.lock()?;
        Ok(inner
            .applications
            .iter()
            .find(|a| a.id == application_id)
            .map(|a| inner.unread(a))
            .unwrap_or(0))
    }
}
