//! # hanko-auth
//!
//! Session lifecycle and third-party identity linking for the Hanko backend.
//!
//! This crate provides:
//! - Signed, time-bounded OAuth flow state with double-submit nonce checking
//! - Pluggable third-party providers (Google, GitHub, Apple, generic OIDC)
//! - Transactional account linking
//! - Session tokens, refresh token exchange and one-time exchange tokens
//! - Audit logging for sign-in outcomes
//!
//! ## Modules
//!
//! - [`config`] - Authentication configuration
//! - [`state`] - Flow state encoding and verification
//! - [`redirect`] - Redirect target allow-listing and response shape
//! - [`provider`] - OAuth provider implementations and registry
//! - [`linking`] - Mapping provider profiles to local users
//! - [`session`] - Session tokens and refresh token exchange
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`thirdparty`] - The authorize/callback orchestrator
//! - [`audit`] - Audit log entries
//! - [`telemetry`] - Error reporting hook
//! - [`http`] - Axum HTTP handlers

pub mod audit;
pub mod config;
pub mod error;
pub mod http;
pub mod linking;
pub mod provider;
pub mod redirect;
pub mod session;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod thirdparty;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::{AuthState, auth_router};
pub use session::SessionManager;
pub use storage::{MemoryPersister, Persister, Transaction};
pub use thirdparty::ThirdPartyService;

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use hanko_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{AuditEventType, AuditLogEntry, AuditLogger, RequestContext};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::http::{AuthState, auth_router};
    pub use crate::linking::{AccountLinker, AccountLinkingResult, LinkingKind};
    pub use crate::provider::{OAuthProvider, ProviderError, ProviderProfile, ProviderRegistry};
    pub use crate::redirect::{RedirectAllowList, RedirectKind};
    pub use crate::session::{IssuedSession, SessionManager};
    pub use crate::state::{FlowState, StateCodec, StateError};
    pub use crate::storage::{MemoryPersister, Persister, Transaction};
    pub use crate::telemetry::{NoopTelemetry, TelemetrySink, TracingTelemetry};
    pub use crate::thirdparty::{FlowResponse, StateCookie, ThirdPartyService};
    pub use crate::types::{ExchangeToken, Identity, RefreshToken, User};
}
