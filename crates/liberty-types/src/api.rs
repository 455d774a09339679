use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ApplicationStatus, CategoryPatch, GrantPatch, GrantStatus, NewCategory, NewGrant, NewGrantApplication,
};
use crate::validate::{self, MAX_CHAT_BODY_LEN, MAX_DESCRIPTION_LEN, MAX_NAME_LEN, ValidationError};

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

// -- Subscriptions --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscribeRequest {
    pub email: String,
}

impl SubscribeRequest {
    pub fn validate(&self) -> Result<String, ValidationError> {
        validate::email("email", &self.email)
    }
}

// -- Applications --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateApplicationRequest {
    #[serde(default)]
    pub grant_id: Option<Uuid>,
    pub applicant_name: String,
    pub email: String,
    pub project_name: String,
    pub project_description: String,
    #[serde(default)]
    pub requested_amount: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub github: Option<String>,
}

impl CreateApplicationRequest {
    pub fn validate(&self, chat_token: String) -> Result<NewGrantApplication, ValidationError> {
        Ok(NewGrantApplication {
            grant_id: self.grant_id,
            applicant_name: validate::required("applicantName", &self.applicant_name, MAX_NAME_LEN)?,
            email: validate::email("email", &self.email)?,
            project_name: validate::required("projectName", &self.project_name, MAX_NAME_LEN)?,
            project_description: validate::required(
                "projectDescription",
                &self.project_description,
                MAX_DESCRIPTION_LEN,
            )?,
            requested_amount: validate::optional(
                "requestedAmount",
                self.requested_amount.as_deref(),
                MAX_NAME_LEN,
            )?,
            website: validate::optional_url("website", self.website.as_deref())?,
            github: validate::optional_url("github", self.github.as_deref())?,
            chat_token,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationResponse {
    pub id: Uuid,
    pub chat_token: String,
    pub status: ApplicationStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplicationQuery {
    pub status: Option<ApplicationStatus>,
}

/// What an applicant sees when opening their chat link.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantView {
    pub application_id: Uuid,
    pub project_name: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

// -- Chat --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendChatMessageRequest {
    pub body: String,
}

impl SendChatMessageRequest {
    pub fn validate(&self) -> Result<String, ValidationError> {
        validate::required("body", &self.body, MAX_CHAT_BODY_LEN)
    }
}

// -- Categories --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateCategoryRequest {
    pub fn validate(&self) -> Result<NewCategory, ValidationError> {
        Ok(NewCategory {
            name: validate::required("name", &self.name, MAX_NAME_LEN)?,
            description: validate::optional("description", self.description.as_deref(), MAX_DESCRIPTION_LEN)?,
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCategoryRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// An empty string clears the description.
    #[serde(default)]
    pub description: Option<String>,
}

impl UpdateCategoryRequest {
    pub fn validate(&self) -> Result<CategoryPatch, ValidationError> {
        Ok(CategoryPatch {
            name: self
                .name
                .as_deref()
                .map(|n| validate::required("name", n, MAX_NAME_LEN))
                .transpose()?,
            description: self
                .description
                .as_deref()
                .map(|d| validate::optional("description", Some(d), MAX_DESCRIPTION_LEN))
                .transpose()?,
        })
    }
}

// -- Grants --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateGrantRequest {
    pub category_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub reward: Option<String>,
    #[serde(default)]
    pub status: Option<GrantStatus>,
}

impl CreateGrantRequest {
    pub fn validate(&self) -> Result<NewGrant, ValidationError> {
        Ok(NewGrant {
            category_id: self.category_id,
            title: validate::required("title", &self.title, MAX_NAME_LEN)?,
            description: validate::required("description", &self.description, MAX_DESCRIPTION_LEN)?,
            reward: validate::optional("reward", self.reward.as_deref(), MAX_NAME_LEN)?,
            status: self.status.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateGrantRequest {
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// An empty string clears the reward.
    #[serde(default)]
    pub reward: Option<String>,
    #[serde(default)]
    pub status: Option<GrantStatus>,
}

impl UpdateGrantRequest {
    pub fn validate(&self) -> Result<GrantPatch, ValidationError> {
        Ok(GrantPatch {
            category_id: self.category_id,
            title: self
                .title
                .as_deref()
                .map(|t| validate::required("title", t, MAX_NAME_LEN))
                .transpose()?,
            description: self
                .description
                .as_deref()
                .map(|d| validate::required("description", d, MAX_DESCRIPTION_LEN))
                .transpose()?,
            reward: self
                .reward
                .as_deref()
                .map(|r| validate::optional("reward", Some(r), MAX_NAME_LEN))
                .transpose()?,
            status: self.status,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantQuery {
    pub category_id: Option<Uuid>,
    /// Admin listings only; the public listing never shows closed grants.
    pub include_closed: Option<bool>,
}

// -- Eligibility & market data --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityResponse {
    pub address: String,
    pub balance_sats: u64,
    pub eligible: bool,
    pub tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct CalculatorQuery {
    pub sats: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatorResponse {
    pub balance_sats: u64,
    pub eligible: bool,
    pub tokens: u64,
    pub min_balance_sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceResponse {
    pub usd: f64,
    pub fetched_at: DateTime<Utc>,
}
