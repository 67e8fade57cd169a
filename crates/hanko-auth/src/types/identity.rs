use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A third-party account linked to exactly one local user.
///
/// `(provider, provider_user_id)` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,

    /// Lower-cased provider name.
    pub provider: String,

    /// The provider's stable subject identifier.
    pub provider_user_id: String,

    pub user_id: Uuid,

    /// Last profile received from the provider.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(with = "time::serde::rfc3339")]
    pub linked_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Identity {
    /// Creates a new identity link.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        provider_user_id: impl Into<String>,
        user_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            provider_user_id: provider_user_id.into(),
            user_id,
            data,
            linked_at: now,
            updated_at: now,
        }
    }
}
