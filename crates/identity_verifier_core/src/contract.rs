use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::VerifierError;

pub const PHYSICAL_ID_PREFIX: &str = "identity-verification";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;
pub const DEFAULT_ATTEMPT_DELAY_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestKind {
    Create,
    Update,
    Delete,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

/// Properties the provisioning system passes to the verifier resource.
///
/// CloudFormation stringifies scalar properties, so the numeric overrides
/// accept both JSON numbers and numeric strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VerifierProperties {
    #[serde(default)]
    pub identity_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u32")]
    pub max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_optional_u32")]
    pub delay_seconds: Option<u32>,
}

/// CloudFormation custom resource request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: RequestKind,
    #[serde(rename = "ResponseURL", default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub stack_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: VerifierProperties,
    #[serde(default)]
    pub old_resource_properties: Option<VerifierProperties>,
}

impl CustomResourceEvent {
    /// Parses a raw request.
    ///
    /// A Delete never reads the polling overrides, so malformed overrides are
    /// dropped for it instead of failing the rollback of the Create that
    /// rejected them.
    pub fn from_value(value: Value) -> Result<Self, VerifierError> {
        let malformed = |error: serde_json::Error| {
            VerifierError::invalid_request(format!("malformed custom resource event: {error}"))
        };

        match serde_json::from_value::<Self>(value.clone()) {
            Ok(event) => Ok(event),
            Err(error) if is_delete_request(&value) => {
                serde_json::from_value(without_property_overrides(value))
                    .map_err(|_| malformed(error))
            }
            Err(error) => Err(malformed(error)),
        }
    }

    /// Physical id reported when no better one is known, e.g. when a create
    /// fails before verification finishes.
    pub fn fallback_physical_id(&self) -> String {
        if let Some(existing) = self
            .physical_resource_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
        {
            return existing.to_string();
        }

        match self
            .resource_properties
            .identity_name
            .as_deref()
            .map(normalize_identity_name)
        {
            Some(Ok(name)) => physical_resource_id(&name),
            _ => format!("{PHYSICAL_ID_PREFIX}-{}", self.logical_resource_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub identity_name: String,
    pub max_attempts: u32,
    pub attempt_delay: Duration,
    pub request_kind: RequestKind,
}

impl VerificationRequest {
    /// Time spent sleeping when every attempt is used. The final attempt is
    /// not followed by a delay.
    pub fn polling_window(&self) -> Duration {
        self.attempt_delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }

    /// One delay per attempt. Covers the sleeps plus the time the queries
    /// themselves take, and is what must fit into the invocation timeout.
    pub fn attempt_budget(&self) -> Duration {
        self.attempt_delay.saturating_mul(self.max_attempts)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutcomeStatus {
    Verified,
    TimedOut,
}

/// Terminal result of one Create/Update, keyed by the id reported to the
/// provisioning system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub physical_id: String,
    pub status: OutcomeStatus,
}

impl VerificationOutcome {
    pub fn for_identity(normalized_identity: &str, status: OutcomeStatus) -> Self {
        Self {
            physical_id: physical_resource_id(normalized_identity),
            status,
        }
    }
}

/// Verification state as reported by the email service for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityStatus {
    Verified,
    Pending,
    NotStarted,
    TemporaryFailure,
    Failed,
    Other(String),
}

impl IdentityStatus {
    pub fn from_service_value(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "VERIFIED" => Self::Verified,
            "PENDING" => Self::Pending,
            "NOT_STARTED" | "NOTSTARTED" => Self::NotStarted,
            "TEMPORARY_FAILURE" | "TEMPORARYFAILURE" => Self::TemporaryFailure,
            "FAILED" => Self::Failed,
            _ => Self::Other(value.to_string()),
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Verified => "verified",
            Self::Pending => "pending",
            Self::NotStarted => "not_started",
            Self::TemporaryFailure => "temporary_failure",
            Self::Failed => "failed",
            Self::Other(value) => value,
        }
    }
}

/// Answer of a single status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: IdentityStatus,
    pub raw_attributes: BTreeMap<String, String>,
}

impl StatusReport {
    pub fn new(status: IdentityStatus) -> Self {
        Self {
            status,
            raw_attributes: BTreeMap::new(),
        }
    }
}

/// Provider-framework response for a successful invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderResponse {
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,
    #[serde(rename = "Data", default)]
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// Document uploaded to the pre-signed `ResponseURL` of a raw custom resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CloudFormationResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub data: BTreeMap<String, Value>,
}

impl CloudFormationResponse {
    pub fn success(event: &CustomResourceEvent, response: &ProviderResponse) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: response.physical_resource_id.clone(),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data: response.data.clone(),
        }
    }

    pub fn failure(event: &CustomResourceEvent, reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            physical_resource_id: event.fallback_physical_id(),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            data: BTreeMap::new(),
        }
    }
}

/// Lower-cases, trims, and strips the root dot from an identity name.
pub fn normalize_identity_name(raw: &str) -> Result<String, VerifierError> {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.is_empty() {
        return Err(VerifierError::invalid_request("IdentityName cannot be empty"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(VerifierError::invalid_request(format!(
            "IdentityName '{name}' must not contain whitespace"
        )));
    }
    Ok(name)
}

/// Stable physical id for a normalized identity name.
///
/// The same identity always maps to the same id, so repeated deployments are
/// recognised as "no change" by the provisioning system.
pub fn physical_resource_id(normalized_identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_identity.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{PHYSICAL_ID_PREFIX}-{}", &digest[..16])
}

fn is_delete_request(value: &Value) -> bool {
    value.get("RequestType").and_then(Value::as_str) == Some(RequestKind::Delete.as_str())
}

/// Keeps only what a Delete reads: the envelope and a string `IdentityName`.
fn without_property_overrides(mut value: Value) -> Value {
    if let Some(object) = value.as_object_mut() {
        let mut properties = Map::new();
        if let Some(name) = object
            .get("ResourceProperties")
            .and_then(|properties| properties.get("IdentityName"))
            .filter(|name| name.is_string())
        {
            properties.insert("IdentityName".to_string(), name.clone());
        }
        object.remove("OldResourceProperties");
        object.insert("ResourceProperties".to_string(), Value::Object(properties));
    }
    value
}

fn deserialize_optional_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .map(Some)
            .ok_or_else(|| {
                D::Error::custom(format!("expected a non-negative integer, got {number}"))
            }),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => text.trim().parse::<u32>().map(Some).map_err(|error| {
            D::Error::custom(format!("expected a non-negative integer, got '{text}': {error}"))
        }),
        Some(other) => Err(D::Error::custom(format!(
            "expected a non-negative integer, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn physical_id_is_stable_for_equivalent_names() {
        let first = physical_resource_id(&normalize_identity_name("Example.com.").unwrap());
        let second = physical_resource_id(&normalize_identity_name(" example.com").unwrap());

        assert_eq!(first, second);
        assert!(first.starts_with("identity-verification-"));
        assert_eq!(first.len(), "identity-verification-".len() + 16);
    }

    #[test]
    fn physical_id_differs_between_identities() {
        assert_ne!(
            physical_resource_id("example.com"),
            physical_resource_id("example.org")
        );
    }

    #[test]
    fn normalize_rejects_blank_names() {
        let error = normalize_identity_name("  . ").expect_err("blank name should fail");
        assert_eq!(error.kind(), "invalid_request");
    }

    #[test]
    fn parses_cloudformation_event_with_stringified_numbers() {
        let event = CustomResourceEvent::from_value(json!({
            "RequestType": "Create",
            "ResponseURL": "https://example.invalid/response",
            "StackId": "arn:aws:cloudformation:eu-central-1:000000000000:stack/app/1",
            "RequestId": "req-1",
            "ResourceType": "Custom::SesVerificationWaiter",
            "LogicalResourceId": "SesVerificationWaiter",
            "ResourceProperties": {
                "ServiceToken": "arn:aws:lambda:eu-central-1:000000000000:function:waiter",
                "IdentityName": "example.com",
                "MaxAttempts": "12",
                "DelaySeconds": 3
            }
        }))
        .expect("event should parse");

        assert_eq!(event.request_type, RequestKind::Create);
        assert_eq!(
            event.response_url.as_deref(),
            Some("https://example.invalid/response")
        );
        assert_eq!(event.resource_properties.max_attempts, Some(12));
        assert_eq!(event.resource_properties.delay_seconds, Some(3));
        assert_eq!(event.physical_resource_id, None);
    }

    #[test]
    fn rejects_unknown_request_type() {
        let error = CustomResourceEvent::from_value(json!({
            "RequestType": "Replace",
            "ResourceProperties": {"IdentityName": "example.com"}
        }))
        .expect_err("unknown request type should fail");

        assert_eq!(error.kind(), "invalid_request");
    }

    #[test]
    fn rejects_non_numeric_attempt_override() {
        let error = CustomResourceEvent::from_value(json!({
            "RequestType": "Update",
            "ResourceProperties": {"IdentityName": "example.com", "MaxAttempts": "many"}
        }))
        .expect_err("non-numeric override should fail");

        assert!(error.to_string().contains("non-negative integer"));
    }

    #[test]
    fn delete_tolerates_malformed_overrides() {
        let event = CustomResourceEvent::from_value(json!({
            "RequestType": "Delete",
            "LogicalResourceId": "Waiter",
            "ResourceProperties": {"IdentityName": "Example.com", "MaxAttempts": "many", "DelaySeconds": -1},
            "OldResourceProperties": {"IdentityName": 7}
        }))
        .expect("delete should parse");

        assert_eq!(event.request_type, RequestKind::Delete);
        assert_eq!(event.resource_properties.max_attempts, None);
        assert_eq!(event.old_resource_properties, None);
        assert_eq!(event.fallback_physical_id(), physical_resource_id("example.com"));

        let event = CustomResourceEvent::from_value(json!({
            "RequestType": "Delete",
            "LogicalResourceId": "Waiter",
            "ResourceProperties": {"IdentityName": ["example.com"]}
        }))
        .expect("delete without a usable identity should parse");
        assert_eq!(event.fallback_physical_id(), "identity-verification-Waiter");
    }

    #[test]
    fn attempt_budget_counts_one_delay_per_attempt() {
        let request = VerificationRequest {
            identity_name: "example.com".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_delay: Duration::from_secs(DEFAULT_ATTEMPT_DELAY_SECONDS),
            request_kind: RequestKind::Create,
        };

        assert_eq!(request.attempt_budget(), Duration::from_secs(200));
    }

    #[test]
    fn outcome_is_keyed_by_the_deterministic_id() {
        let outcome = VerificationOutcome::for_identity("example.com", OutcomeStatus::Verified);
        assert_eq!(outcome.physical_id, physical_resource_id("example.com"));
        assert_eq!(outcome.status, OutcomeStatus::Verified);
    }

    #[test]
    fn polling_window_excludes_delay_after_final_attempt() {
        let request = VerificationRequest {
            identity_name: "example.com".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_delay: Duration::from_secs(DEFAULT_ATTEMPT_DELAY_SECONDS),
            request_kind: RequestKind::Create,
        };

        assert_eq!(request.polling_window(), Duration::from_secs(195));
    }

    #[test]
    fn service_status_values_map_to_identity_status() {
        assert!(IdentityStatus::from_service_value("SUCCESS").is_verified());
        assert_eq!(
            IdentityStatus::from_service_value("temporary_failure"),
            IdentityStatus::TemporaryFailure
        );
        assert_eq!(
            IdentityStatus::from_service_value("SomethingNew"),
            IdentityStatus::Other("SomethingNew".to_string())
        );
    }

    #[test]
    fn failure_response_falls_back_to_deterministic_physical_id() {
        let event = CustomResourceEvent::from_value(json!({
            "RequestType": "Create",
            "StackId": "stack",
            "RequestId": "req",
            "LogicalResourceId": "Waiter",
            "ResourceProperties": {"IdentityName": "Example.com"}
        }))
        .expect("event should parse");

        let response = CloudFormationResponse::failure(&event, "timed out");
        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.physical_resource_id, physical_resource_id("example.com"));

        let body = serde_json::to_value(&response).expect("response should serialize");
        assert_eq!(body["Status"], "FAILED");
        assert_eq!(body["Reason"], "timed out");
        assert!(body.get("Data").is_none());
    }
}
