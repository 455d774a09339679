//! Field checks shared by the request DTOs.

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_CHAT_BODY_LEN: usize = 5_000;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_URL_LEN: usize = 2_048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} is not a valid email address")]
    InvalidEmail { field: &'static str },

    #[error("{field} must be an http(s) URL")]
    InvalidUrl { field: &'static str },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Missing { field }
            | Self::TooLong { field, .. }
            | Self::InvalidEmail { field }
            | Self::InvalidUrl { field } => field,
        }
    }
}

/// Trims and checks a required text field.
pub fn required(field: &'static str, value: &str, max: usize) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    if trimmed.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

/// Trims an optional text field; blank collapses to `None`.
pub fn optional(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max => Err(ValidationError::TooLong { field, max }),
        Some(v) => Ok(Some(v.to_string())),
    }
}

/// Normalises an email (trimmed, lowercased) and applies a shape check.
pub fn email(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let normalized = value.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    if normalized.len() > MAX_EMAIL_LEN {
        return Err(ValidationError::TooLong { field, max: MAX_EMAIL_LEN });
    }

    let mut parts = normalized.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::InvalidEmail { field });
    };
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..");
    if local.is_empty() || !domain_ok || normalized.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidEmail { field });
    }

    Ok(normalized)
}

pub fn optional_url(field: &'static str, value: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(url) = optional(field, value, MAX_URL_LEN)? else {
        return Ok(None);
    };
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ValidationError::InvalidUrl { field });
    }
    Ok(Some(url))
}
