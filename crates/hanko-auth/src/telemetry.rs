//! Error reporting hook.
//!
//! The orchestrator and session handlers report failures to a
//! [`TelemetrySink`]. Reporting never changes control flow. Breadcrumbs and
//! messages must not carry token values.

use std::collections::BTreeMap;

use crate::error::AuthError;

/// A step recorded before an error is captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub category: &'static str,
    pub message: String,
    pub data: BTreeMap<&'static str, String>,
}

impl Breadcrumb {
    #[must_use]
    pub fn new(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.data.insert(key, value.into());
        self
    }
}

/// Destination for breadcrumbs and captured errors.
pub trait TelemetrySink: Send + Sync {
    fn breadcrumb(&self, breadcrumb: Breadcrumb);

    fn capture_message(&self, message: &str);

    fn capture_error(&self, error: &AuthError);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn breadcrumb(&self, breadcrumb: Breadcrumb) {
        tracing::debug!(
            target: "telemetry",
            category = breadcrumb.category,
            data = ?breadcrumb.data,
            "{}",
            breadcrumb.message
        );
    }

    fn capture_message(&self, message: &str) {
        tracing::warn!(target: "telemetry", "{message}");
    }

    fn capture_error(&self, error: &AuthError) {
        if error.is_server_error() {
            tracing::error!(target: "telemetry", category = %error.category(), error = %error, "captured error");
        } else {
            tracing::warn!(target: "telemetry", category = %error.category(), error = %error, "captured error");
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn breadcrumb(&self, _breadcrumb: Breadcrumb) {}

    fn capture_message(&self, _message: &str) {}

    fn capture_error(&self, _error: &AuthError) {}
}
