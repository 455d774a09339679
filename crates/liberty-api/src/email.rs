//! Transactional email through the SendGrid v3 API.
//!
//! Sends are fire-and-forget from the handlers' point of view: a failed
//! email is logged and never fails the request that triggered it.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use liberty_types::models::{ApplicationStatus, GrantApplication};

#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Unset disables sending; messages are only logged.
    pub api_key: Option<String>,
    pub api_base: String,
    pub from: String,
    /// Receives a notification for every new application.
    pub admin_email: Option<String>,
    /// Public site root, used to build applicant chat links.
    pub site_url: String,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.sendgrid.com".into(),
            from: "grants@libertybitcoin.org".into(),
            admin_email: None,
            site_url: "http://localhost:5000".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email delivery is disabled")]
    Disabled,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    config: Arc<MailerConfig>,
}

impl Mailer {
    pub fn new(http: reqwest::Client, config: MailerConfig) -> Self {
        Self { http, config: Arc::new(config) }
    }

    pub fn config(&self) -> &MailerConfig {
        &self.config
    }

    pub async fn send(&self, email: &Email) -> Result<(), EmailError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(EmailError::Disabled);
        };

        let payload = json!({
            "personalizations": [{ "to": [{ "email": email.to }] }],
            "from": { "email": self.config.from },
            "subject": email.subject,
            "content": [{ "type": "text/plain", "value": email.text }],
        });

        let resp = self
            .http
            .post(format!("{}/v3/mail/send", self.config.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmailError::Rejected { status, body });
        }
        Ok(())
    }

    /// Sends on a detached task and logs the outcome.
    pub fn send_in_background(&self, email: Email) {
        let mailer = self.clone();
        tokio::spawn(async move {
            match mailer.send(&email).await {
                Ok(()) => info!("Sent '{}' to {}", email.subject, email.to),
                Err(EmailError::Disabled) => debug!("Email disabled, skipped '{}' to {}", email.subject, email.to),
                Err(e) => warn!("Failed to send '{}' to {}: {}", email.subject, email.to, e),
            }
        });
    }

    pub fn chat_link(&self, application: &GrantApplication) -> String {
        format!("{}/grants/chat/{}", self.config.site_url.trim_end_matches('/'), application.chat_token)
    }
}

// -- Messages --

pub fn subscription_confirmation(email: &str) -> Email {
    Email {
        to: email.to_string(),
        subject: "You're on the Liberty Bitcoin list".into(),
        text: "Thanks for subscribing to Liberty Bitcoin updates.\n\n\
               We'll email you about the token launch, grant rounds and eligibility snapshots.\n"
            .into(),
    }
}

pub fn application_received(application: &GrantApplication, chat_link: &str) -> Email {
    Email {
        to: application.email.clone(),
        subject: format!("We received your grant application: {}", application.project_name),
        text: format!(
            "Hi {},\n\n\
             Thanks for applying for a Liberty Bitcoin grant with \"{}\".\n\
             The team will review it and reply in your application thread:\n\n{}\n\n\
             Keep this link private; anyone with it can read and post in the thread.\n",
            application.applicant_name, application.project_name, chat_link
        ),
    }
}

pub fn admin_new_application(application: &GrantApplication, admin_email: &str) -> Email {
    Email {
        to: admin_email.to_string(),
        subject: format!("New grant application: {}", application.project_name),
        text: format!(
            "{} <{}> applied with \"{}\".\n\nRequested: {}\nWebsite: {}\nGitHub: {}\n\n{}\n",
            application.applicant_name,
            application.email,
            application.project_name,
            application.requested_amount.as_deref().unwrap_or("-"),
            application.website.as_deref().unwrap_or("-"),
            application.github.as_deref().unwrap_or("-"),
            application.project_description,
        ),
    }
}

pub fn status_changed(application: &GrantApplication, chat_link: &str) -> Email {
    let headline = match application.status {
        ApplicationStatus::Received => "is back in the queue",
        ApplicationStatus::InReview => "is now in review",
        ApplicationStatus::Granted => "has been granted",
        ApplicationStatus::Rejected => "was not selected this round",
    };
    Email {
        to: application.email.clone(),
        subject: format!("Your application \"{}\" {}", application.project_name, headline),
        text: format!(
            "Hi {},\n\nYour grant application \"{}\" {}.\n\nFollow up with the team here:\n{}\n",
            application.applicant_name, application.project_name, headline, chat_link
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn application(status: ApplicationStatus) -> GrantApplication {
        GrantApplication {
            id: Uuid::new_v4(),
            grant_id: None,
            applicant_name: "Ada".into(),
            email: "ada@example.org".into(),
            project_name: "Relay".into(),
            project_description: "Nostr relay".into(),
            requested_amount: None,
            website: None,
            github: None,
            status,
            chat_token: "tok123".into(),
            last_admin_viewed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn disabled_mailer_does_not_send() {
        let mailer = Mailer::new(reqwest::Client::new(), MailerConfig::default());
        let err = mailer.send(&subscription_confirmation("a@b.co")).await.unwrap_err();
        assert!(matches!(err, EmailError::Disabled));
    }

    #[test]
    fn chat_link_uses_site_root() {
        let mailer = Mailer::new(
            reqwest::Client::new(),
            MailerConfig { site_url: "https://libertybitcoin.org/".into(), ..Default::default() },
        );
        assert_eq!(
            mailer.chat_link(&application(ApplicationStatus::Received)),
            "https://libertybitcoin.org/grants/chat/tok123"
        );
    }

    #[test]
    fn status_email_names_the_new_status() {
        let email = status_changed(&application(ApplicationStatus::Granted), "https://x/chat");
        assert_eq!(email.to, "ada@example.org");
        assert!(email.subject.contains("has been granted"));
        assert!(email.text.contains("https://x/chat"));
    }
}
