//! Row tuples and their domain conversions.

use time::OffsetDateTime;
use uuid::Uuid;

use hanko_auth::types::{ExchangeToken, Identity, RefreshToken, User};

pub(crate) type UserRow = (Uuid, Option<String>, bool, OffsetDateTime, OffsetDateTime);

pub(crate) type IdentityRow = (
    Uuid,
    String,
    String,
    Uuid,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

pub(crate) type ExchangeTokenRow = (Uuid, String, Uuid, OffsetDateTime, OffsetDateTime);

pub(crate) type RefreshTokenRow = (
    Uuid,
    String,
    Uuid,
    Uuid,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

pub(crate) const USER_COLUMNS: &str = "id, email, email_verified, created_at, updated_at";
pub(crate) const IDENTITY_COLUMNS: &str =
    "id, provider, provider_user_id, user_id, data, linked_at, updated_at";
pub(crate) const EXCHANGE_TOKEN_COLUMNS: &str = "id, token_hash, user_id, created_at, expires_at";
pub(crate) const REFRESH_TOKEN_COLUMNS: &str =
    "id, token_hash, user_id, session_id, created_at, expires_at, revoked_at";

pub(crate) fn user(row: UserRow) -> User {
    User {
        id: row.0,
        email: row.1,
        email_verified: row.2,
        created_at: row.3,
        updated_at: row.4,
    }
}

pub(crate) fn identity(row: IdentityRow) -> Identity {
    Identity {
        id: row.0,
        provider: row.1,
        provider_user_id: row.2,
        user_id: row.3,
        data: row.4,
        linked_at: row.5,
        updated_at: row.6,
    }
}

pub(crate) fn exchange_token(row: ExchangeTokenRow) -> ExchangeToken {
    ExchangeToken {
        id: row.0,
        token_hash: row.1,
        user_id: row.2,
        created_at: row.3,
        expires_at: row.4,
    }
}

pub(crate) fn refresh_token(row: RefreshTokenRow) -> RefreshToken {
    RefreshToken {
        id: row.0,
        token_hash: row.1,
        user_id: row.2,
        session_id: row.3,
        created_at: row.4,
        expires_at: row.5,
        revoked_at: row.6,
    }
}
