use std::time::Duration;

use identity_verifier_core::contract::{DEFAULT_ATTEMPT_DELAY_SECONDS, DEFAULT_MAX_ATTEMPTS};
use identity_verifier_core::error::VerifierError;

pub const MAX_ATTEMPTS_ENV: &str = "VERIFICATION_MAX_ATTEMPTS";
pub const DELAY_SECONDS_ENV: &str = "VERIFICATION_DELAY_SECONDS";
pub const TIMEOUT_MARGIN_SECONDS_ENV: &str = "VERIFICATION_TIMEOUT_MARGIN_SECONDS";
pub const DEFAULT_TIMEOUT_MARGIN_SECONDS: u64 = 10;

/// Polling defaults for the verifier. Resource properties may override the
/// attempt budget and delay per resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub max_attempts: u32,
    pub attempt_delay: Duration,
    /// Headroom kept between the polling window and the invocation deadline.
    pub timeout_margin: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_delay: Duration::from_secs(DEFAULT_ATTEMPT_DELAY_SECONDS),
            timeout_margin: Duration::from_secs(DEFAULT_TIMEOUT_MARGIN_SECONDS),
        }
    }
}

impl VerifierConfig {
    pub fn from_env() -> Result<Self, VerifierError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VerifierError> {
        let defaults = Self::default();

        let max_attempts = match parse_u64(&lookup, MAX_ATTEMPTS_ENV)? {
            Some(0) => {
                return Err(VerifierError::configuration(format!(
                    "{MAX_ATTEMPTS_ENV} must be a positive integer"
                )))
            }
            Some(value) => u32::try_from(value).map_err(|_| {
                VerifierError::configuration(format!("{MAX_ATTEMPTS_ENV} is too large"))
            })?,
            None => defaults.max_attempts,
        };
        let attempt_delay = parse_u64(&lookup, DELAY_SECONDS_ENV)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.attempt_delay);
        let timeout_margin = parse_u64(&lookup, TIMEOUT_MARGIN_SECONDS_ENV)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout_margin);

        Ok(Self {
            max_attempts,
            attempt_delay,
            timeout_margin,
        })
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, VerifierError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|error| {
            VerifierError::configuration(format!(
                "{key} must be a non-negative integer, got '{raw}': {error}"
            ))
        }),
    }
}
