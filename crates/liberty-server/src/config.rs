use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, bail};

use liberty_api::eligibility::EligibilityRules;
use liberty_api::email::MailerConfig;
use liberty_api::state::{ApiConfig, OAuthConfig};

/// Placeholder session secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me", "secret"];

/// Selects `MemStorage` instead of SQLite.
pub const MEMORY_DB: &str = ":memory:";

#[derive(Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: String,
    pub api: ApiConfig,
    pub mail: MailerConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string());

        let session_secret = var("LIBERTY_SESSION_SECRET", "");
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            bail!("LIBERTY_SESSION_SECRET is unset or still a placeholder");
        }

        let host = var("LIBERTY_HOST", "0.0.0.0");
        let port: u16 = parse(&var("LIBERTY_PORT", "5000"), "LIBERTY_PORT")?;
        let addr: SocketAddr = format!("{host}:{port}").parse().context("LIBERTY_HOST")?;

        let ttl_hours: i64 = parse(&var("LIBERTY_SESSION_TTL_HOURS", "168"), "LIBERTY_SESSION_TTL_HOURS")?;
        if ttl_hours <= 0 {
            bail!("LIBERTY_SESSION_TTL_HOURS must be positive");
        }

        let defaults = ApiConfig::default();
        let api = ApiConfig {
            session_secret,
            session_ttl: chrono::Duration::hours(ttl_hours),
            cookie_secure: parse(&var("LIBERTY_COOKIE_SECURE", "true"), "LIBERTY_COOKIE_SECURE")?,
            oauth: OAuthConfig {
                issuer: var("LIBERTY_OAUTH_ISSUER", &defaults.oauth.issuer),
                client_id: var("LIBERTY_OAUTH_CLIENT_ID", ""),
                client_secret: var("LIBERTY_OAUTH_CLIENT_SECRET", ""),
                redirect_url: var("LIBERTY_OAUTH_REDIRECT_URL", ""),
            },
            admin_provider_ids: var("LIBERTY_ADMIN_PROVIDER_IDS", "")
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect(),
            eligibility: EligibilityRules {
                min_balance_sats: parse(&var("LIBERTY_MIN_BALANCE_SATS", "100000"), "LIBERTY_MIN_BALANCE_SATS")?,
                tokens_per_sat: parse(&var("LIBERTY_TOKENS_PER_SAT", "1"), "LIBERTY_TOKENS_PER_SAT")?,
            },
            balance_api: var("LIBERTY_BALANCE_API", &defaults.balance_api),
            price_api: var("LIBERTY_PRICE_API", &defaults.price_api),
        };

        let mail_defaults = MailerConfig::default();
        let mail = MailerConfig {
            api_key: get("SENDGRID_API_KEY").filter(|k| !k.is_empty()),
            api_base: mail_defaults.api_base,
            from: var("LIBERTY_MAIL_FROM", &mail_defaults.from),
            admin_email: get("LIBERTY_ADMIN_EMAIL").filter(|e| !e.is_empty()),
            site_url: var("LIBERTY_PUBLIC_URL", &mail_defaults.site_url),
        };

        Ok(Self {
            addr,
            db_path: var("LIBERTY_DB_PATH", "liberty.db"),
            api,
            mail,
        })
    }
}

fn parse<T: FromStr>(value: &str, key: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse().with_context(|| format!("invalid {key}: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("LIBERTY_SESSION_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.addr.port(), 5000);
        assert_eq!(config.db_path, "liberty.db");
        assert_eq!(config.api.session_ttl, chrono::Duration::hours(168));
        assert!(config.api.cookie_secure);
        assert_eq!(config.api.eligibility, EligibilityRules::default());
        assert!(config.mail.api_key.is_none());
        assert!(!config.api.oauth.is_configured());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("LIBERTY_SESSION_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn admin_ids_are_split_and_trimmed() {
        let config = load(&[
            ("LIBERTY_SESSION_SECRET", "s3cret-value"),
            ("LIBERTY_ADMIN_PROVIDER_IDS", " 12, 34 ,,"),
            ("LIBERTY_COOKIE_SECURE", "false"),
            ("LIBERTY_MIN_BALANCE_SATS", "5000"),
        ])
        .unwrap();
        assert_eq!(config.api.admin_provider_ids, ["12", "34"]);
        assert!(!config.api.cookie_secure);
        assert_eq!(config.api.eligibility.min_balance_sats, 5000);
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = load(&[("LIBERTY_SESSION_SECRET", "s3cret-value"), ("LIBERTY_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("LIBERTY_PORT"));
    }
}
