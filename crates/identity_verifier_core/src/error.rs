use std::time::Duration;

use thiserror::Error;

/// Failures that cross the verifier boundary.
///
/// Transient status-query failures are not represented here; the poller
/// absorbs them and only reports [`VerifierError::VerificationTimeout`] once
/// the attempt budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifierError {
    /// Required zone, domain, or tuning value is missing or malformed.
    ///
    /// Raised while the identity stack is constructed or before the first
    /// status query, never discovered through a timeout.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The provisioning event could not be understood.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The attempt budget was exhausted without a verified status.
    #[error(
        "identity '{identity_name}' was not verified after {attempts} attempts ({window:?} polling window); re-run the deployment once DNS propagation completes"
    )]
    VerificationTimeout {
        identity_name: String,
        attempts: u32,
        window: Duration,
    },

    #[error("dns record operation failed: {message}")]
    Dns { message: String },

    #[error("email identity operation failed: {message}")]
    EmailIdentity { message: String },

    #[error("custom resource response could not be delivered: {message}")]
    ResponseDelivery { message: String },
}

impl VerifierError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn dns(message: impl Into<String>) -> Self {
        Self::Dns {
            message: message.into(),
        }
    }

    pub fn email_identity(message: impl Into<String>) -> Self {
        Self::EmailIdentity {
            message: message.into(),
        }
    }

    pub fn response_delivery(message: impl Into<String>) -> Self {
        Self::ResponseDelivery {
            message: message.into(),
        }
    }

    /// Short machine-readable class used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::VerificationTimeout { .. } => "verification_timeout",
            Self::Dns { .. } => "dns_error",
            Self::EmailIdentity { .. } => "email_identity_error",
            Self::ResponseDelivery { .. } => "response_delivery_error",
        }
    }
}
