use std::time::Duration;

use chrono::Utc;
use identity_verifier_lambda::adapters::aws::SesStatusSource;
use identity_verifier_lambda::adapters::response::PresignedUrlResponseSink;
use identity_verifier_lambda::adapters::sleeper::BlockingSleeper;
use identity_verifier_lambda::config::VerifierConfig;
use identity_verifier_lambda::handlers::lifecycle::handle_custom_resource_invocation;
use identity_verifier_lambda::telemetry::init_tracing;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::error;

fn remaining_time(deadline_ms: u64) -> Option<Duration> {
    let now_ms = u64::try_from(Utc::now().timestamp_millis()).ok()?;
    Some(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let config = VerifierConfig::from_env().map_err(|error| Error::from(error.to_string()))?;
    let remaining = remaining_time(event.context.deadline);

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let status_source = SesStatusSource::new(aws_sdk_sesv2::Client::new(&aws_config));
    let response_sink = PresignedUrlResponseSink::new(reqwest::Client::new());

    handle_custom_resource_invocation(
        event.payload,
        &config,
        remaining,
        &status_source,
        &BlockingSleeper,
        &response_sink,
    )
    .map_err(|failure| {
        error!(
            component = "verifier_lambda",
            event = "invocation_failed",
            error_kind = failure.kind(),
            error = %failure,
        );
        Error::from(failure.to_string())
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();
    lambda_runtime::run(service_fn(handle_request)).await
}
