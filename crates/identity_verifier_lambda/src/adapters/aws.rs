//! SES and Route53 implementations of the adapter traits.
//!
//! The traits are synchronous so the poller stays a plain sequential loop; each
//! call enters the surrounding Tokio runtime with `block_in_place`.

use std::collections::BTreeMap;

use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_sesv2::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_sesv2::operation::get_email_identity::GetEmailIdentityOutput;
use identity_verifier_core::contract::{IdentityStatus, StatusReport};
use identity_verifier_core::dkim::{DkimRecord, DkimToken, DKIM_RECORD_TTL_SECONDS};

use crate::adapters::dns::DnsRecordWriter;
use crate::adapters::email_identity::EmailIdentityProvisioner;
use crate::adapters::status_source::{QueryError, QueryErrorKind, StatusSource};

pub struct SesStatusSource {
    ses_client: aws_sdk_sesv2::Client,
}

impl SesStatusSource {
    pub fn new(ses_client: aws_sdk_sesv2::Client) -> Self {
        Self { ses_client }
    }
}

impl StatusSource for SesStatusSource {
    fn query_status(&self, identity_name: &str) -> Result<StatusReport, QueryError> {
        let client = self.ses_client.clone();
        let identity = identity_name.to_string();

        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .get_email_identity()
                    .email_identity(identity)
                    .send()
                    .await
            })
        });

        match result {
            Ok(output) => Ok(status_report_from_identity(&output)),
            Err(error) => {
                let kind = if error.as_service_error().is_some() {
                    QueryErrorKind::from_code(error.code())
                } else {
                    QueryErrorKind::Network
                };
                Err(QueryError::new(
                    kind,
                    format!(
                        "failed to query email identity: {}",
                        DisplayErrorContext(&error)
                    ),
                ))
            }
        }
    }
}

pub fn status_report_from_identity(output: &GetEmailIdentityOutput) -> StatusReport {
    let mut raw_attributes = BTreeMap::new();
    raw_attributes.insert(
        "VerifiedForSendingStatus".to_string(),
        output.verified_for_sending_status().to_string(),
    );
    if let Some(status) = output.verification_status() {
        raw_attributes.insert("VerificationStatus".to_string(), status.as_str().to_string());
    }
    if let Some(status) = output.dkim_attributes().and_then(|dkim| dkim.status()) {
        raw_attributes.insert("DkimStatus".to_string(), status.as_str().to_string());
    }
    if let Some(identity_type) = output.identity_type() {
        raw_attributes.insert("IdentityType".to_string(), identity_type.as_str().to_string());
    }

    let status = match output.verification_status() {
        Some(status) => IdentityStatus::from_service_value(status.as_str()),
        None if output.verified_for_sending_status() => IdentityStatus::Verified,
        None => IdentityStatus::Pending,
    };

    StatusReport {
        status,
        raw_attributes,
    }
}

pub struct SesIdentityProvisioner {
    ses_client: aws_sdk_sesv2::Client,
}

impl SesIdentityProvisioner {
    pub fn new(ses_client: aws_sdk_sesv2::Client) -> Self {
        Self { ses_client }
    }
}

impl EmailIdentityProvisioner for SesIdentityProvisioner {
    fn ensure_domain_identity(&self, domain: &str) -> Result<Vec<DkimToken>, String> {
        let client = self.ses_client.clone();
        let identity = domain.to_string();

        let tokens = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let created = client
                    .create_email_identity()
                    .email_identity(identity.clone())
                    .send()
                    .await;

                match created {
                    Ok(output) => Ok(output
                        .dkim_attributes()
                        .map(|dkim| dkim.tokens().to_vec())
                        .unwrap_or_default()),
                    Err(error)
                        if error
                            .as_service_error()
                            .map(|service| service.is_already_exists_exception())
                            .unwrap_or(false) =>
                    {
                        client
                            .get_email_identity()
                            .email_identity(identity)
                            .send()
                            .await
                            .map(|output| {
                                output
                                    .dkim_attributes()
                                    .map(|dkim| dkim.tokens().to_vec())
                                    .unwrap_or_default()
                            })
                            .map_err(|error| {
                                format!(
                                    "failed to read existing email identity: {}",
                                    DisplayErrorContext(&error)
                                )
                            })
                    }
                    Err(error) => Err(format!(
                        "failed to create email identity: {}",
                        DisplayErrorContext(&error)
                    )),
                }
            })
        })?;

        Ok(tokens
            .iter()
            .map(|token| DkimToken::from_easy_dkim(token, domain))
            .collect())
    }
}

pub struct Route53RecordWriter {
    route53_client: aws_sdk_route53::Client,
}

impl Route53RecordWriter {
    pub fn new(route53_client: aws_sdk_route53::Client) -> Self {
        Self { route53_client }
    }
}

impl DnsRecordWriter for Route53RecordWriter {
    fn upsert_cname(&self, record: &DkimRecord) -> Result<(), String> {
        let change_batch = cname_change_batch(record)?;
        let client = self.route53_client.clone();
        let zone_id = record.zone.zone_id.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .change_resource_record_sets()
                    .hosted_zone_id(zone_id)
                    .change_batch(change_batch)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| {
                        format!(
                            "failed to upsert DKIM record: {}",
                            aws_sdk_route53::error::DisplayErrorContext(&error)
                        )
                    })
            })
        })
    }
}

fn cname_change_batch(record: &DkimRecord) -> Result<ChangeBatch, String> {
    let resource_record = ResourceRecord::builder()
        .value(record.record_value.clone())
        .build()
        .map_err(|error| format!("invalid DKIM record value: {error}"))?;
    let record_set = ResourceRecordSet::builder()
        .name(record.fqdn())
        .r#type(RrType::Cname)
        .ttl(DKIM_RECORD_TTL_SECONDS)
        .resource_records(resource_record)
        .build()
        .map_err(|error| format!("invalid DKIM record set: {error}"))?;
    let change = Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(record_set)
        .build()
        .map_err(|error| format!("invalid DKIM record change: {error}"))?;

    ChangeBatch::builder()
        .comment(format!("DKIM selector {}", record.record_name))
        .changes(change)
        .build()
        .map_err(|error| format!("invalid DKIM change batch: {error}"))
}
