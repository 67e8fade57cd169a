//! Audit log for sign-in and token exchange outcomes.
//!
//! Entries are appended through the [`Persister`] when storage output is
//! enabled and emitted as `tracing` events on the `audit` target when stdout
//! output is enabled.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::AuditLogConfig;
use crate::storage::Persister;

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ThirdpartySignupSucceeded,
    ThirdpartySigninSucceeded,
    ThirdpartyLinkingSucceeded,
    ThirdpartySigninSignupFailed,
    TokenExchangeSucceeded,
    TokenExchangeFailed,
}

impl AuditEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThirdpartySignupSucceeded => "thirdparty_signup_succeeded",
            Self::ThirdpartySigninSucceeded => "thirdparty_signin_succeeded",
            Self::ThirdpartyLinkingSucceeded => "thirdparty_linking_succeeded",
            Self::ThirdpartySigninSignupFailed => "thirdparty_signin_signup_failed",
            Self::TokenExchangeSucceeded => "token_exchange_succeeded",
            Self::TokenExchangeFailed => "token_exchange_failed",
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ThirdpartySigninSignupFailed | Self::TokenExchangeFailed
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request an audit entry was recorded for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub event_type: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Coarse error description for failure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request: RequestContext,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuditLogEntry {
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        user_id: Option<Uuid>,
        error: Option<String>,
        request: RequestContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            user_id,
            error,
            request,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Writes audit entries to the configured outputs.
#[derive(Clone)]
pub struct AuditLogger {
    persister: Arc<dyn Persister>,
    config: AuditLogConfig,
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    #[must_use]
    pub fn new(persister: Arc<dyn Persister>, config: AuditLogConfig) -> Self {
        Self { persister, config }
    }

    /// Records an event.
    ///
    /// # Errors
    ///
    /// Returns the storage error if persisting the entry fails.
    pub async fn create(
        &self,
        event_type: AuditEventType,
        user_id: Option<Uuid>,
        error: Option<String>,
        request: &RequestContext,
    ) -> AuthResult<()> {
        let entry = AuditLogEntry::new(event_type, user_id, error, request.clone());

        if self.config.output_stdout {
            tracing::info!(
                target: "audit",
                event_type = %entry.event_type,
                user_id = ?entry.user_id,
                error = ?entry.error,
                method = %entry.request.method,
                path = %entry.request.path,
                request_id = ?entry.request.request_id,
                "audit event"
            );
        }
        if self.config.storage_enabled {
            self.persister.create_audit_log(&entry).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPersister;

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&AuditEventType::ThirdpartySignupSucceeded).unwrap();
        assert_eq!(json, "\"thirdparty_signup_succeeded\"");
        assert_eq!(
            AuditEventType::TokenExchangeFailed.to_string(),
            "token_exchange_failed"
        );
        assert!(AuditEventType::ThirdpartySigninSignupFailed.is_failure());
        assert!(!AuditEventType::ThirdpartyLinkingSucceeded.is_failure());
    }

    #[tokio::test]
    async fn test_logger_persists_when_enabled() {
        let persister = MemoryPersister::new();
        let logger = AuditLogger::new(Arc::new(persister.clone()), AuditLogConfig::default());
        let user_id = Uuid::new_v4();
        logger
            .create(
                AuditEventType::ThirdpartySigninSucceeded,
                Some(user_id),
                None,
                &RequestContext::new("GET", "/thirdparty/callback"),
            )
            .await
            .unwrap();

        let logs = persister.audit_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].user_id, Some(user_id));
        assert_eq!(logs[0].request.path, "/thirdparty/callback");
    }

    #[tokio::test]
    async fn test_logger_skips_storage_when_disabled() {
        let persister = MemoryPersister::new();
        let logger = AuditLogger::new(
            Arc::new(persister.clone()),
            AuditLogConfig {
                storage_enabled: false,
                output_stdout: true,
            },
        );
        logger
            .create(
                AuditEventType::TokenExchangeFailed,
                None,
                Some("invalid token".to_string()),
                &RequestContext::default(),
            )
            .await
            .unwrap();
        assert!(persister.audit_logs().await.is_empty());
    }
}
