use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A local user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Primary email address, unique across users when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub email_verified: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    /// Creates a new user with a random ID.
    #[must_use]
    pub fn new(email: Option<String>, email_verified: bool) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            email: email.map(|e| normalize_email(&e)),
            email_verified,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lower-cases and trims an email address for storage and lookup.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_normalizes_email() {
        let user = User::new(Some("  Jane.Doe@Example.COM ".to_string()), true);
        assert_eq!(user.email.as_deref(), Some("jane.doe@example.com"));
        assert!(user.email_verified);
        assert_eq!(user.created_at, user.updated_at);
    }
}
