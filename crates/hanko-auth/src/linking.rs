//! Account linking.
//!
//! Maps a verified provider profile to a local user inside the caller's
//! transaction:
//!
//! 1. a known `(provider, external_id)` signs in its linked user
//! 2. otherwise a user owning the same verified email gets a new identity
//! 3. otherwise a new user and identity are created
//!
//! Races between concurrent callbacks for the same account are resolved by
//! the storage uniqueness constraints and surface as `AccountLinkingConflict`.

use crate::AuthResult;
use crate::audit::AuditEventType;
use crate::config::AccountConfig;
use crate::error::AuthError;
use crate::provider::{ProviderError, ProviderProfile};
use crate::storage::Transaction;
use crate::types::{Identity, User, normalize_email};

/// How a profile was mapped to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkingKind {
    /// The identity already existed.
    ExistingUserSignIn,
    /// A new identity was linked to an existing user.
    NewLinkToExistingUser,
    /// A new user and identity were created.
    NewUserSignUp,
}

impl LinkingKind {
    /// The audit event recorded for this outcome.
    #[must_use]
    pub fn audit_event(&self) -> AuditEventType {
        match self {
            Self::ExistingUserSignIn => AuditEventType::ThirdpartySigninSucceeded,
            Self::NewLinkToExistingUser => AuditEventType::ThirdpartyLinkingSucceeded,
            Self::NewUserSignUp => AuditEventType::ThirdpartySignupSucceeded,
        }
    }
}

/// Result of [`AccountLinker::link`].
#[derive(Debug, Clone)]
pub struct AccountLinkingResult {
    pub user: User,
    pub identity: Identity,
    pub kind: LinkingKind,
}

/// Finds or creates the local account for a provider profile.
#[derive(Debug, Clone, Default)]
pub struct AccountLinker {
    config: AccountConfig,
}

impl AccountLinker {
    #[must_use]
    pub fn new(config: AccountConfig) -> Self {
        Self { config }
    }

    /// Links `profile` from `provider` to a local user.
    ///
    /// All reads and writes go through `tx`; nothing is visible to other
    /// requests until the caller commits.
    ///
    /// # Errors
    ///
    /// - `UnverifiedEmail` if the profile email is unverified and belongs to a user
    /// - `AccountLinkingConflict` if the email belongs to a user and linking by
    ///   email is disabled, or a concurrent transaction created the same record
    /// - `SignupDisabled` if a new user would be needed and sign-up is off
    pub async fn link(
        &self,
        tx: &mut dyn Transaction,
        provider: &str,
        profile: &ProviderProfile,
    ) -> AuthResult<AccountLinkingResult> {
        if profile.external_id.trim().is_empty() {
            return Err(ProviderError::ProfileFetchFailed(
                "profile has an empty subject".to_string(),
            )
            .into());
        }
        let provider = provider.to_lowercase();
        let data = serde_json::to_value(profile)
            .map_err(|e| AuthError::internal(format!("failed to serialize profile: {e}")))?;

        if let Some(identity) = tx.find_identity(&provider, &profile.external_id).await? {
            let user = tx.find_user(identity.user_id).await?.ok_or_else(|| {
                AuthError::internal(format!(
                    "identity {} references missing user {}",
                    identity.id, identity.user_id
                ))
            })?;
            tx.touch_identity(identity.id, &data).await?;
            tracing::debug!(provider = %provider, user_id = %user.id, "Existing identity signed in");
            return Ok(AccountLinkingResult {
                user,
                identity,
                kind: LinkingKind::ExistingUserSignIn,
            });
        }

        let email = profile
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());

        if let Some(email) = &email
            && let Some(user) = tx.find_user_by_email(email).await?
        {
            if !profile.email_verified {
                return Err(AuthError::UnverifiedEmail);
            }
            if !self.config.link_by_email {
                return Err(AuthError::account_linking_conflict(
                    "a user with this email already exists",
                ));
            }
            let identity = Identity::new(&provider, &profile.external_id, user.id, data);
            tx.create_identity(&identity).await?;
            tracing::debug!(provider = %provider, user_id = %user.id, "Identity linked to existing user");
            return Ok(AccountLinkingResult {
                user,
                identity,
                kind: LinkingKind::NewLinkToExistingUser,
            });
        }

        if !self.config.allow_signup {
            return Err(AuthError::SignupDisabled);
        }

        let user = User::new(email, profile.email_verified);
        let identity = Identity::new(&provider, &profile.external_id, user.id, data);
        tx.create_user(&user).await?;
        tx.create_identity(&identity).await?;
        tracing::debug!(provider = %provider, user_id = %user.id, "New user signed up");
        Ok(AccountLinkingResult {
            user,
            identity,
            kind: LinkingKind::NewUserSignUp,
        })
    }
}
