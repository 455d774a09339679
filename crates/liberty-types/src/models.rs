use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or submitted enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! labelled_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? } $(, aliases { $($alias:literal => $target:ident),+ })?) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)+
                    $($($alias => Ok(Self::$target),)+)?
                    other => Err(UnknownLabel { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// -- Users --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    /// Subject id assigned by the OAuth identity provider.
    pub provider_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile data received from the identity provider, keyed by `provider_id`.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub provider_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    /// Promotes the user on upsert. An existing admin is never demoted.
    pub is_admin: bool,
}

/// Server-side session. The browser only holds the session id; `sid` is its digest.
///
/// `user_id` is set once the visitor has signed in; before that the session
/// only carries login state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub sid: String,
    pub user_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

// -- Subscriptions --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSubscription {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// -- Grants --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCategory {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrantStatus {
    #[default]
    Open,
    Featured,
    HighPriority,
    Closed,
}

labelled_enum!(GrantStatus, "grant status", {
    Open => "open",
    Featured => "featured",
    HighPriority => "high-priority",
    Closed => "closed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub id: Uuid,
    pub category_id: Uuid,
    pub title: String,
    pub description: String,
    pub reward: Option<String>,
    pub status: GrantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGrant {
    pub category_id: Uuid,
    pub title: String,
    pub description: String,
    pub reward: Option<String>,
    pub status: GrantStatus,
}

#[derive(Debug, Clone, Default)]
pub struct GrantPatch {
    pub category_id: Option<Uuid>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` clears the reward.
    pub reward: Option<Option<String>>,
    pub status: Option<GrantStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
    pub category_id: Option<Uuid>,
    pub include_closed: bool,
}

// -- Applications --

/// Lifecycle of a grant application: `received` → `in-review` → `granted` | `rejected`.
///
/// `pipeline` is an older name for `in-review`; it is accepted on input and
/// never written back out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    #[default]
    Received,
    #[serde(alias = "pipeline")]
    InReview,
    Granted,
    Rejected,
}

labelled_enum!(ApplicationStatus, "application status", {
    Received => "received",
    InReview => "in-review",
    Granted => "granted",
    Rejected => "rejected",
}, aliases { "pipeline" => InReview });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantApplication {
    pub id: Uuid,
    pub grant_id: Option<Uuid>,
    pub applicant_name: String,
    pub email: String,
    pub project_name: String,
    pub project_description: String,
    pub requested_amount: Option<String>,
    pub website: Option<String>,
    pub github: Option<String>,
    pub status: ApplicationStatus,
    pub chat_token: String,
    pub last_admin_viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated application fields; the store fills in ids, token and timestamps.
#[derive(Debug, Clone)]
pub struct NewGrantApplication {
    pub grant_id: Option<Uuid>,
    pub applicant_name: String,
    pub email: String,
    pub project_name: String,
    pub project_description: String,
    pub requested_amount: Option<String>,
    pub website: Option<String>,
    pub github: Option<String>,
    pub chat_token: String,
}

/// Admin list row: the application plus its derived unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    #[serde(flatten)]
    pub application: GrantApplication,
    pub unread_count: u64,
}

// -- Chat --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Admin,
    Applicant,
}

labelled_enum!(SenderRole, "sender role", {
    Admin => "admin",
    Applicant => "applicant",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub application_id: Uuid,
    pub sender: SenderRole,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Unread = applicant messages newer than the admin's read cursor.
/// With no cursor every applicant message is unread.
pub fn unread_count<'a, I>(messages: I, last_admin_viewed_at: Option<DateTime<Utc>>) -> u64
where
    I: IntoIterator<Item = &'a ChatMessage>,
{
    messages
        .into_iter()
        .filter(|m| m.sender == SenderRole::Applicant)
        .filter(|m| last_admin_viewed_at.is_none_or(|seen| m.created_at > seen))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(sender: SenderRole, created_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            application_id: Uuid::nil(),
            sender,
            body: "hi".into(),
            created_at,
        }
    }

    #[test]
    fn pipeline_is_an_alias_for_in_review() {
        assert_eq!("pipeline".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::InReview);
        let parsed: ApplicationStatus = serde_json::from_str("\"pipeline\"").unwrap();
        assert_eq!(parsed, ApplicationStatus::InReview);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"in-review\"");
    }

    #[test]
    fn labels_round_trip_through_from_str() {
        for status in [
            ApplicationStatus::Received,
            ApplicationStatus::InReview,
            ApplicationStatus::Granted,
            ApplicationStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ApplicationStatus>().unwrap(), status);
        }
        assert_eq!("high-priority".parse::<GrantStatus>().unwrap(), GrantStatus::HighPriority);
        assert!("archived".parse::<GrantStatus>().is_err());
    }

    #[test]
    fn unread_counts_only_applicant_messages_after_cursor() {
        let t0 = Utc::now();
        let msgs = vec![
            message(SenderRole::Applicant, t0),
            message(SenderRole::Admin, t0 + Duration::seconds(1)),
            message(SenderRole::Applicant, t0 + Duration::seconds(2)),
            message(SenderRole::Applicant, t0 + Duration::seconds(3)),
        ];

        assert_eq!(unread_count(&msgs, None), 3);
        assert_eq!(unread_count(&msgs, Some(t0)), 2);
        assert_eq!(unread_count(&msgs, Some(t0 + Duration::seconds(3))), 0);
    }
}
