use std::collections::BTreeMap;
use std::time::Duration;

use identity_verifier_core::contract::{
    normalize_identity_name, CloudFormationResponse, CustomResourceEvent, OutcomeStatus,
    ProviderResponse, RequestKind, ResponseStatus, VerificationOutcome, VerificationRequest,
    PHYSICAL_ID_PREFIX,
};
use identity_verifier_core::error::VerifierError;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::adapters::response::ResponseSink;
use crate::adapters::sleeper::Sleeper;
use crate::adapters::status_source::StatusSource;
use crate::config::VerifierConfig;
use crate::poller::poll;

/// Turns one provisioning lifecycle event into a poll or a no-op.
///
/// `remaining_time` is the time left before the runtime kills the invocation;
/// when known, a polling window that cannot finish inside it is rejected up
/// front.
pub fn handle_lifecycle_event(
    event: &CustomResourceEvent,
    config: &VerifierConfig,
    remaining_time: Option<Duration>,
    source: &dyn StatusSource,
    sleeper: &dyn Sleeper,
) -> Result<ProviderResponse, VerifierError> {
    if event.request_type == RequestKind::Delete {
        let physical_id = event.fallback_physical_id();
        info!(
            component = "lifecycle",
            event = "delete_acknowledged",
            logical_resource_id = %event.logical_resource_id,
            physical_id = %physical_id,
        );
        return Ok(ProviderResponse {
            physical_resource_id: physical_id,
            data: BTreeMap::new(),
        });
    }

    let request = build_verification_request(event, config)?;
    ensure_window_fits(&request, remaining_time, config.timeout_margin)?;

    info!(
        component = "lifecycle",
        event = "verification_started",
        request_kind = request.request_kind.as_str(),
        identity = %request.identity_name,
        max_attempts = request.max_attempts,
        delay_secs = request.attempt_delay.as_secs(),
    );

    let report = poll(
        &request.identity_name,
        request.max_attempts,
        request.attempt_delay,
        source,
        sleeper,
    )?;

    let outcome = VerificationOutcome::for_identity(&request.identity_name, report.outcome);
    match outcome.status {
        OutcomeStatus::Verified => {
            info!(
                component = "lifecycle",
                event = "verification_succeeded",
                identity = %request.identity_name,
                attempts = report.queries,
                physical_id = %outcome.physical_id,
            );
            Ok(ProviderResponse {
                physical_resource_id: outcome.physical_id,
                data: BTreeMap::from([
                    ("IdentityName".to_string(), json!(request.identity_name)),
                    ("Attempts".to_string(), json!(report.queries)),
                ]),
            })
        }
        OutcomeStatus::TimedOut => Err(VerifierError::VerificationTimeout {
            identity_name: request.identity_name.clone(),
            attempts: report.queries,
            window: request.polling_window(),
        }),
    }
}

pub fn build_verification_request(
    event: &CustomResourceEvent,
    config: &VerifierConfig,
) -> Result<VerificationRequest, VerifierError> {
    let properties = &event.resource_properties;
    let identity_name = properties
        .identity_name
        .as_deref()
        .ok_or_else(|| {
            VerifierError::invalid_request("ResourceProperties.IdentityName is required")
        })
        .and_then(normalize_identity_name)?;

    let max_attempts = properties.max_attempts.unwrap_or(config.max_attempts);
    if max_attempts == 0 {
        return Err(VerifierError::configuration(
            "MaxAttempts must be a positive integer",
        ));
    }
    let attempt_delay = properties
        .delay_seconds
        .map(|seconds| Duration::from_secs(u64::from(seconds)))
        .unwrap_or(config.attempt_delay);

    Ok(VerificationRequest {
        identity_name,
        max_attempts,
        attempt_delay,
        request_kind: event.request_type,
    })
}

/// `max_attempts × delay` plus `margin` must stay strictly below the time
/// the invocation has left.
pub fn ensure_window_fits(
    request: &VerificationRequest,
    remaining_time: Option<Duration>,
    margin: Duration,
) -> Result<(), VerifierError> {
    let Some(remaining) = remaining_time else {
        return Ok(());
    };

    let required = request.attempt_budget().saturating_add(margin);
    if required >= remaining {
        return Err(VerifierError::configuration(format!(
            "attempt budget of {}s for '{}' ({} attempts x {}s) plus {}s margin does not fit in the {}s left for this invocation",
            request.attempt_budget().as_secs(),
            request.identity_name,
            request.max_attempts,
            request.attempt_delay.as_secs(),
            margin.as_secs(),
            remaining.as_secs(),
        )));
    }
    Ok(())
}

/// Full invocation entry point.
///
/// With a `ResponseURL` the outcome (success or failure) is uploaded there
/// and the invocation itself succeeds, so the runtime does not retry an event
/// CloudFormation already has an answer for. Without one the provider
/// framework is the caller: success returns the response, failure returns the
/// error.
pub fn handle_custom_resource_invocation(
    payload: Value,
    config: &VerifierConfig,
    remaining_time: Option<Duration>,
    source: &dyn StatusSource,
    sleeper: &dyn Sleeper,
    response_sink: &dyn ResponseSink,
) -> Result<Value, VerifierError> {
    let event = match CustomResourceEvent::from_value(payload.clone()) {
        Ok(event) => event,
        Err(parse_error) if is_raw_delete(&payload) => {
            return acknowledge_raw_delete(&payload, &parse_error, response_sink);
        }
        Err(parse_error) => {
            let reason = parse_error.to_string();
            return match raw_response(&payload, ResponseStatus::Failed, Some(&reason)) {
                (Some(url), response) => {
                    upload(response_sink, &url, &response)?;
                    Ok(json!({ "Status": "FAILED", "Reason": reason }))
                }
                (None, _) => Err(parse_error),
            };
        }
    };

    let result = handle_lifecycle_event(&event, config, remaining_time, source, sleeper);
    if let Err(failure) = &result {
        error!(
            component = "lifecycle",
            event = "invocation_failed",
            error_kind = failure.kind(),
            error = %failure,
            logical_resource_id = %event.logical_resource_id,
        );
    }

    let Some(url) = event
        .response_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    else {
        return result.and_then(|response| {
            serde_json::to_value(response).map_err(|error| {
                VerifierError::response_delivery(format!("failed to serialize response: {error}"))
            })
        });
    };

    let document = match &result {
        Ok(response) => CloudFormationResponse::success(&event, response),
        Err(failure) => CloudFormationResponse::failure(&event, failure.to_string()),
    };
    upload(response_sink, url, &document)?;

    Ok(json!({
        "Status": document.status,
        "PhysicalResourceId": document.physical_resource_id,
    }))
}

fn upload(
    response_sink: &dyn ResponseSink,
    url: &str,
    document: &CloudFormationResponse,
) -> Result<(), VerifierError> {
    response_sink.send(url, document).map_err(|message| {
        warn!(
            component = "lifecycle",
            event = "response_upload_failed",
            error = %message,
        );
        VerifierError::response_delivery(message)
    })?;
    info!(
        component = "lifecycle",
        event = "response_uploaded",
        status = ?document.status,
        physical_id = %document.physical_resource_id,
    );
    Ok(())
}

fn is_raw_delete(payload: &Value) -> bool {
    payload.get("RequestType").and_then(Value::as_str) == Some(RequestKind::Delete.as_str())
}

/// A Delete succeeds even when its envelope does not parse; otherwise a
/// rollback can never finish.
fn acknowledge_raw_delete(
    payload: &Value,
    parse_error: &VerifierError,
    response_sink: &dyn ResponseSink,
) -> Result<Value, VerifierError> {
    let (url, response) = raw_response(payload, ResponseStatus::Success, None);
    warn!(
        component = "lifecycle",
        event = "malformed_delete_acknowledged",
        error = %parse_error,
        physical_id = %response.physical_resource_id,
    );

    match url {
        Some(url) => {
            upload(response_sink, &url, &response)?;
            Ok(json!({
                "Status": response.status,
                "PhysicalResourceId": response.physical_resource_id,
            }))
        }
        None => serde_json::to_value(ProviderResponse {
            physical_resource_id: response.physical_resource_id,
            data: BTreeMap::new(),
        })
        .map_err(|error| {
            VerifierError::response_delivery(format!("failed to serialize response: {error}"))
        }),
    }
}

/// Builds a response document straight from an event that did not parse,
/// along with its response URL when it names one.
fn raw_response(
    payload: &Value,
    status: ResponseStatus,
    reason: Option<&str>,
) -> (Option<String>, CloudFormationResponse) {
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let url = Some(field("ResponseURL")).filter(|url| !url.trim().is_empty());

    let logical_resource_id = field("LogicalResourceId");
    let physical_resource_id = Some(field("PhysicalResourceId"))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| format!("{PHYSICAL_ID_PREFIX}-{logical_resource_id}"));

    (
        url,
        CloudFormationResponse {
            status,
            reason: reason.map(str::to_string),
            physical_resource_id,
            stack_id: field("StackId"),
            request_id: field("RequestId"),
            logical_resource_id,
            data: BTreeMap::new(),
        },
    )
}
