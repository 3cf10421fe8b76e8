use std::process::ExitCode;

use clap::Parser;
use identity_verifier_core::dkim::ZoneHandle;
use identity_verifier_core::stack::{
    DomainSettings, EmailIdentitySource, IdentityStackConfig, IdentityStackPlan,
};
use identity_verifier_lambda::adapters::aws::{
    Route53RecordWriter, SesIdentityProvisioner, SesStatusSource,
};
use identity_verifier_lambda::adapters::sleeper::BlockingSleeper;
use identity_verifier_lambda::config::VerifierConfig;
use identity_verifier_lambda::handlers::bootstrap::{run_bootstrap, BootstrapAdapters};
use identity_verifier_lambda::telemetry::init_tracing;
use tracing::{error, info};

/// Creates an SES domain identity, publishes its DKIM records and waits for
/// verification, outside of any CloudFormation stack.
#[derive(Debug, Parser)]
#[command(name = "identity_bootstrap")]
struct Cli {
    #[arg(long, env = "IDENTITY_DOMAIN")]
    domain: String,
    #[arg(long, env = "IDENTITY_HOSTED_ZONE_ID")]
    hosted_zone_id: Option<String>,
    /// Defaults to the domain itself.
    #[arg(long, env = "IDENTITY_HOSTED_ZONE_NAME")]
    hosted_zone_name: Option<String>,
    /// Wait on an identity that already exists instead of creating one.
    #[arg(long)]
    existing_identity: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    delay_seconds: Option<u32>,
    #[arg(long)]
    sender_name: Option<String>,
}

impl Cli {
    fn stack_config(&self) -> IdentityStackConfig {
        let hosted_zone = self.hosted_zone_id.as_ref().map(|zone_id| {
            ZoneHandle::new(
                zone_id.clone(),
                self.hosted_zone_name
                    .clone()
                    .unwrap_or_else(|| self.domain.clone()),
            )
        });
        let identity = match &self.existing_identity {
            Some(identity_name) => EmailIdentitySource::Existing {
                identity_name: identity_name.clone(),
            },
            None => EmailIdentitySource::CreateHere,
        };

        IdentityStackConfig {
            domain: Some(DomainSettings {
                domain_name: self.domain.clone(),
                hosted_zone,
                identity,
                sender_name: self.sender_name.clone(),
            }),
            max_attempts: self.max_attempts,
            delay_seconds: self.delay_seconds,
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let plan = match IdentityStackPlan::new(cli.stack_config()) {
        Ok(plan) => plan,
        Err(failure) => return report_failure(&failure),
    };
    let config = match VerifierConfig::from_env() {
        Ok(config) => config,
        Err(failure) => return report_failure(&failure),
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let ses_client = aws_sdk_sesv2::Client::new(&aws_config);
    let provisioner = SesIdentityProvisioner::new(ses_client.clone());
    let dns = Route53RecordWriter::new(aws_sdk_route53::Client::new(&aws_config));
    let status_source = SesStatusSource::new(ses_client);
    let adapters = BootstrapAdapters {
        provisioner: &provisioner,
        dns: &dns,
        status_source: &status_source,
        sleeper: &BlockingSleeper,
    };

    match run_bootstrap(&plan, &config, &adapters) {
        Ok(report) => {
            info!(
                component = "identity_bootstrap",
                event = "identity_verified",
                identity = %report.identity_name,
                physical_id = %report.physical_id,
                records_written = report.records_written.len(),
                queries = report.poll.queries,
            );
            if let Some(email) = &report.user_pool_email {
                println!("{}", email.from_email);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => report_failure(&failure),
    }
}

fn report_failure(failure: &identity_verifier_core::error::VerifierError) -> ExitCode {
    error!(
        component = "identity_bootstrap",
        event = "bootstrap_failed",
        error_kind = failure.kind(),
        error = %failure,
    );
    ExitCode::FAILURE
}
