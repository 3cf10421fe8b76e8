//! Self-managed provisioning of a sending identity.
//!
//! Walks the identity stack in materialization order outside CloudFormation:
//! the SES identity is created, its DKIM records are published, the poller
//! waits for verification, and only then is the user pool reported as
//! released. Used for sandbox accounts where no provisioning system runs the
//! verifier resource.

use std::time::Duration;

use identity_verifier_core::contract::{physical_resource_id, OutcomeStatus};
use identity_verifier_core::dkim::DkimRecord;
use identity_verifier_core::error::VerifierError;
use identity_verifier_core::graph::ResourceKind;
use identity_verifier_core::stack::{IdentityStackPlan, UserPoolEmail};
use tracing::info;

use crate::adapters::dns::DnsRecordWriter;
use crate::adapters::email_identity::EmailIdentityProvisioner;
use crate::adapters::sleeper::Sleeper;
use crate::adapters::status_source::StatusSource;
use crate::config::VerifierConfig;
use crate::poller::{poll, PollReport};
use crate::reconciler::write_records;

#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub identity_name: String,
    pub physical_id: String,
    pub materialization_order: Vec<String>,
    pub records_written: Vec<DkimRecord>,
    pub poll: PollReport,
    pub user_pool_email: Option<UserPoolEmail>,
}

pub struct BootstrapAdapters<'a> {
    pub provisioner: &'a dyn EmailIdentityProvisioner,
    pub dns: &'a dyn DnsRecordWriter,
    pub status_source: &'a dyn StatusSource,
    pub sleeper: &'a dyn Sleeper,
}

pub fn run_bootstrap(
    plan: &IdentityStackPlan,
    config: &VerifierConfig,
    adapters: &BootstrapAdapters<'_>,
) -> Result<BootstrapReport, VerifierError> {
    let domain_name = plan
        .domain_name()
        .ok_or_else(|| {
            VerifierError::configuration("a sending domain is required to bootstrap an identity")
        })?
        .to_string();

    let tokens = if plan.creates_identity() {
        let tokens = adapters
            .provisioner
            .ensure_domain_identity(&domain_name)
            .map_err(VerifierError::email_identity)?;
        info!(
            component = "bootstrap",
            event = "email_identity_ready",
            domain = %domain_name,
            dkim_tokens = tokens.len(),
        );
        tokens
    } else {
        Vec::new()
    };

    let stack = plan.build(&tokens)?;
    let verification = stack.verification.as_ref().ok_or_else(|| {
        VerifierError::configuration("identity stack has no verification resources")
    })?;
    let order = stack.graph.materialization_order();
    let materialization_order: Vec<String> = stack
        .graph
        .logical_ids(&order)
        .into_iter()
        .map(str::to_string)
        .collect();
    info!(
        component = "bootstrap",
        event = "stack_planned",
        order = ?materialization_order,
    );

    let mut records_written = Vec::new();
    let mut poll_report = None;
    for handle in order {
        let Some(node) = stack.graph.node(handle) else {
            continue;
        };
        match node.kind {
            ResourceKind::DkimRecord => {
                if let Some((_, record)) = verification
                    .dkim_records
                    .iter()
                    .find(|(record_handle, _)| *record_handle == handle)
                {
                    write_records(std::slice::from_ref(record), adapters.dns)?;
                    records_written.push(record.clone());
                }
            }
            ResourceKind::VerificationWaiter => {
                let max_attempts = verification
                    .waiter_properties
                    .max_attempts
                    .unwrap_or(config.max_attempts);
                let delay = verification
                    .waiter_properties
                    .delay_seconds
                    .map(|seconds| Duration::from_secs(u64::from(seconds)))
                    .unwrap_or(config.attempt_delay);

                let report = poll(
                    &verification.identity_name,
                    max_attempts,
                    delay,
                    adapters.status_source,
                    adapters.sleeper,
                )?;
                if report.outcome == OutcomeStatus::TimedOut {
                    return Err(VerifierError::VerificationTimeout {
                        identity_name: verification.identity_name.clone(),
                        attempts: report.queries,
                        window: delay.saturating_mul(max_attempts.saturating_sub(1)),
                    });
                }
                poll_report = Some(report);
            }
            ResourceKind::UserPool => {
                info!(
                    component = "bootstrap",
                    event = "user_pool_released",
                    logical_id = %node.logical_id,
                    identity = %verification.identity_name,
                );
            }
            ResourceKind::EmailIdentity | ResourceKind::UserPoolClient => {}
        }
    }

    let poll = poll_report.ok_or_else(|| {
        VerifierError::configuration("identity stack has no verification waiter")
    })?;

    Ok(BootstrapReport {
        physical_id: physical_resource_id(&verification.identity_name),
        identity_name: verification.identity_name.clone(),
        materialization_order,
        records_written,
        poll,
        user_pool_email: stack.user_pool_email.clone(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use identity_verifier_core::contract::{IdentityStatus, StatusReport};
    use identity_verifier_core::dkim::{DkimToken, ZoneHandle};
    use identity_verifier_core::stack::{DomainSettings, EmailIdentitySource, IdentityStackConfig};

    use super::*;
    use crate::adapters::status_source::QueryError;

    /// One fake behind every adapter so the journal shows cross-service order.
    struct FakeAccount {
        journal: Mutex<Vec<String>>,
        statuses: Mutex<VecDeque<IdentityStatus>>,
    }

    impl FakeAccount {
        fn new(statuses: Vec<IdentityStatus>) -> Self {
            Self {
                journal: Mutex::new(Vec::new()),
                statuses: Mutex::new(statuses.into()),
            }
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().expect("poisoned mutex").clone()
        }

        fn record(&self, entry: String) {
            self.journal.lock().expect("poisoned mutex").push(entry);
        }

        fn adapters(&self) -> BootstrapAdapters<'_> {
            BootstrapAdapters {
                provisioner: self,
                dns: self,
                status_source: self,
                sleeper: self,
            }
        }
    }

    impl EmailIdentityProvisioner for FakeAccount {
        fn ensure_domain_identity(&self, domain: &str) -> Result<Vec<DkimToken>, String> {
            self.record(format!("create_identity:{domain}"));
            Ok(["tok1", "tok2"]
                .iter()
                .map(|token| DkimToken::from_easy_dkim(token, domain))
                .collect())
        }
    }

    impl DnsRecordWriter for FakeAccount {
        fn upsert_cname(&self, record: &DkimRecord) -> Result<(), String> {
            self.record(format!("upsert:{}", record.fqdn()));
            Ok(())
        }
    }

    impl StatusSource for FakeAccount {
        fn query_status(&self, identity_name: &str) -> Result<StatusReport, QueryError> {
            self.record(format!("query:{identity_name}"));
            let status = self
                .statuses
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or(IdentityStatus::Pending);
            Ok(StatusReport::new(status))
        }
    }

    impl Sleeper for FakeAccount {
        fn sleep(&self, duration: Duration) {
            self.record(format!("sleep:{}", duration.as_secs()));
        }
    }

    fn plan(identity: EmailIdentitySource, max_attempts: Option<u32>) -> IdentityStackPlan {
        IdentityStackPlan::new(IdentityStackConfig {
            domain: Some(DomainSettings {
                domain_name: "mail.example.com".to_string(),
                hosted_zone: Some(ZoneHandle::new("Z123", "example.com")),
                identity,
                sender_name: None,
            }),
            max_attempts,
            delay_seconds: Some(1),
        })
        .expect("valid plan")
    }

    #[test]
    fn publishes_records_before_polling_and_releases_the_pool() {
        let account = FakeAccount::new(vec![IdentityStatus::Pending, IdentityStatus::Verified]);

        let report = run_bootstrap(
            &plan(EmailIdentitySource::CreateHere, None),
            &VerifierConfig::default(),
            &account.adapters(),
        )
        .expect("bootstrap succeeds");

        assert_eq!(
            account.journal(),
            vec![
                "create_identity:mail.example.com",
                "upsert:tok1._domainkey.mail.example.com",
                "upsert:tok2._domainkey.mail.example.com",
                "query:mail.example.com",
                "sleep:1",
                "query:mail.example.com",
            ]
        );
        assert!(report.poll.is_verified());
        assert_eq!(report.records_written.len(), 2);
        assert_eq!(
            report.materialization_order.last().map(String::as_str),
            Some("UserPoolClient")
        );
        assert_eq!(
            report.user_pool_email.map(|email| email.from_email),
            Some("no-reply@mail.example.com".to_string())
        );
        assert!(report.physical_id.starts_with("identity-verification-"));
    }

    #[test]
    fn existing_identity_skips_provisioning_and_dns() {
        let account = FakeAccount::new(vec![IdentityStatus::Verified]);

        let report = run_bootstrap(
            &plan(
                EmailIdentitySource::Existing {
                    identity_name: "mail.example.com".to_string(),
                },
                None,
            ),
            &VerifierConfig::default(),
            &account.adapters(),
        )
        .expect("bootstrap succeeds");

        assert_eq!(account.journal(), vec!["query:mail.example.com"]);
        assert!(report.records_written.is_empty());
    }

    #[test]
    fn timeout_stops_before_the_pool_is_released() {
        let account = FakeAccount::new(Vec::new());

        let error = run_bootstrap(
            &plan(EmailIdentitySource::CreateHere, Some(3)),
            &VerifierConfig::default(),
            &account.adapters(),
        )
        .expect_err("pending identity should time out");

        assert_eq!(error.kind(), "verification_timeout");
        let queries = account
            .journal()
            .iter()
            .filter(|entry| entry.starts_with("query:"))
            .count();
        assert_eq!(queries, 3);
    }

    #[test]
    fn requires_a_domain() {
        let account = FakeAccount::new(Vec::new());
        let plan = IdentityStackPlan::new(IdentityStackConfig::default()).expect("plan");

        let error = run_bootstrap(&plan, &VerifierConfig::default(), &account.adapters())
            .expect_err("no domain");

        assert_eq!(error.kind(), "configuration_error");
        assert!(account.journal().is_empty());
    }
}
