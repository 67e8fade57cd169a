//! Authentication error types.
//!
//! Every failure in the session and third-party flows is an [`AuthError`].
//! Browser-facing flows translate it once into a redirect carrying
//! [`AuthError::redirect_error_code`] and [`AuthError::public_description`];
//! API-facing handlers use the `IntoResponse` impl in [`crate::http::error`].

use std::fmt;

use crate::provider::ProviderError;
use crate::state::StateError;

/// Description shown to clients in place of the detail of server errors.
pub const SERVER_ERROR_DESCRIPTION: &str = "an internal error has occurred";

/// Errors that can occur during session and third-party operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is malformed or not permitted.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The request lacks a valid session, refresh, or exchange token.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Generic description of the failure.
        message: String,
    },

    /// A requested record does not exist.
    #[error("Not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// The provider name is unknown or the provider is disabled.
    #[error("Unknown provider: {name}")]
    UnknownProvider {
        /// The requested provider name.
        name: String,
    },

    /// The flow state could not be verified.
    #[error(transparent)]
    State(#[from] StateError),

    /// An outbound provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider redirected back with its own error.
    #[error("Provider reported error: {error}")]
    ProviderReported {
        /// The OAuth error code sent by the provider.
        error: String,
        /// The provider's error description, if any.
        description: String,
    },

    /// A concurrent attempt already linked the same third-party account.
    #[error("Account linking conflict: {message}")]
    AccountLinkingConflict {
        /// Description of the conflicting record.
        message: String,
    },

    /// The provider email is unverified and already belongs to a local user.
    #[error("Third-party email is not verified")]
    UnverifiedEmail,

    /// No matching account exists and sign-up is disabled.
    #[error("Sign-up is disabled")]
    SignupDisabled,

    /// An error occurred while storing or retrieving data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownProvider` error.
    #[must_use]
    pub fn unknown_provider(name: impl Into<String>) -> Self {
        Self::UnknownProvider { name: name.into() }
    }

    /// Creates a new `ProviderReported` error.
    #[must_use]
    pub fn provider_reported(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::ProviderReported {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a new `AccountLinkingConflict` error.
    #[must_use]
    pub fn account_linking_conflict(message: impl Into<String>) -> Self {
        Self::AccountLinkingConflict {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if this is a session or token error.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::NotFound { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } | Self::NotFound { .. } => ErrorCategory::Authentication,
            Self::State(_) => ErrorCategory::State,
            Self::UnknownProvider { .. }
            | Self::Provider(_)
            | Self::ProviderReported { .. } => ErrorCategory::Federation,
            Self::AccountLinkingConflict { .. }
            | Self::UnverifiedEmail
            | Self::SignupDisabled => ErrorCategory::Linking,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the `error` query value used when redirecting to an error target.
    ///
    /// Upstream provider faults collapse to `invalid_request` because the
    /// authorization code cannot be reused.
    #[must_use]
    pub fn redirect_error_code(&self) -> &str {
        match self {
            Self::InvalidRequest { .. }
            | Self::Unauthorized { .. }
            | Self::NotFound { .. }
            | Self::UnknownProvider { .. }
            | Self::State(_)
            | Self::Provider(_) => "invalid_request",
            Self::ProviderReported { error, .. } => error,
            Self::AccountLinkingConflict { .. } => "user_conflict",
            Self::UnverifiedEmail => "unverified_email",
            Self::SignupDisabled => "signup_disabled",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Returns the description that may be shown to the end user.
    ///
    /// Server errors never leak their detail.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::InvalidRequest { message } | Self::Unauthorized { message } => message.clone(),
            Self::NotFound { .. } => "not found".to_string(),
            Self::UnknownProvider { name } => format!("provider '{name}' is not enabled"),
            Self::State(err) => err.to_string(),
            Self::Provider(err) => err.public_description().to_string(),
            Self::ProviderReported { description, .. } => description.clone(),
            Self::AccountLinkingConflict { .. } => {
                "third-party account is already linked to another user".to_string()
            }
            Self::UnverifiedEmail => {
                "third-party account linking for an unverified email is not allowed".to_string()
            }
            Self::SignupDisabled => "account does not exist".to_string(),
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                SERVER_ERROR_DESCRIPTION.to_string()
            }
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token and session errors.
    Authentication,
    /// Request validation errors.
    Validation,
    /// Flow state errors.
    State,
    /// Identity provider errors.
    Federation,
    /// Account linking errors.
    Linking,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Validation => write!(f, "validation"),
            Self::State => write!(f, "state"),
            Self::Federation => write!(f, "federation"),
            Self::Linking => write!(f, "linking"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
