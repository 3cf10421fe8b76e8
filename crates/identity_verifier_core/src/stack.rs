//! Construction of the identity resources and their ordering.
//!
//! When a sending domain is configured, the stack contains the email identity,
//! its DKIM records, a verification waiter, and the user pool. The user pool is
//! gated on the waiter through a direct handle edge, and the waiter waits on
//! every DKIM record so no status query runs before the records exist.

use serde::{Deserialize, Serialize};

use crate::contract::{normalize_identity_name, VerifierProperties};
use crate::dkim::{plan_dkim_records, DkimRecord, DkimToken, ZoneHandle};
use crate::error::VerifierError;
use crate::graph::{DependencyEdge, ResourceGraph, ResourceHandle, ResourceKind};

pub const SENDER_LOCAL_PART: &str = "no-reply";
pub const DEFAULT_SENDER_NAME: &str = "Tool-Set Project";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailIdentitySource {
    /// The identity and its DKIM records are created by this stack.
    CreateHere,
    /// The identity is owned elsewhere (e.g. a foundation stack that also
    /// publishes the DKIM records).
    Existing { identity_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSettings {
    pub domain_name: String,
    pub hosted_zone: Option<ZoneHandle>,
    pub identity: EmailIdentitySource,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStackConfig {
    pub domain: Option<DomainSettings>,
    pub max_attempts: Option<u32>,
    pub delay_seconds: Option<u32>,
}

/// SES-backed email settings for the user pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoolEmail {
    pub from_email: String,
    pub reply_to: String,
    pub from_name: String,
}

impl UserPoolEmail {
    /// Sender addresses always follow the verified domain.
    pub fn for_domain(domain: &str, from_name: Option<&str>) -> Self {
        let address = format!("{SENDER_LOCAL_PART}@{domain}");
        Self {
            from_email: address.clone(),
            reply_to: address,
            from_name: from_name.unwrap_or(DEFAULT_SENDER_NAME).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResources {
    pub identity_name: String,
    pub email_identity: Option<ResourceHandle>,
    pub dkim_records: Vec<(ResourceHandle, DkimRecord)>,
    pub waiter: ResourceHandle,
    pub waiter_properties: VerifierProperties,
}

#[derive(Debug, Clone)]
pub struct IdentityStack {
    pub graph: ResourceGraph,
    pub user_pool: ResourceHandle,
    pub user_pool_client: ResourceHandle,
    pub verification: Option<VerificationResources>,
    pub user_pool_email: Option<UserPoolEmail>,
}

impl IdentityStack {
    /// The edge that holds the user pool back until verification succeeds.
    pub fn gate(&self) -> Option<DependencyEdge> {
        self.verification.as_ref().map(|verification| DependencyEdge {
            downstream: self.user_pool,
            upstream: verification.waiter,
        })
    }
}

/// Validated stack configuration.
///
/// Creating the plan is where configuration errors surface: a domain without
/// a hosted zone, when this stack owns the identity, fails here rather than as
/// a verification timeout during deployment.
#[derive(Debug, Clone)]
pub struct IdentityStackPlan {
    config: IdentityStackConfig,
    domain_name: Option<String>,
}

impl IdentityStackPlan {
    pub fn new(config: IdentityStackConfig) -> Result<Self, VerifierError> {
        if config.max_attempts == Some(0) {
            return Err(VerifierError::configuration(
                "max_attempts must be a positive integer",
            ));
        }

        let domain_name = match &config.domain {
            None => None,
            Some(domain) => Some(validate_domain(domain)?),
        };

        Ok(Self {
            config,
            domain_name,
        })
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    /// True when the caller must supply DKIM tokens to [`Self::build`].
    pub fn creates_identity(&self) -> bool {
        matches!(
            self.config.domain.as_ref().map(|domain| &domain.identity),
            Some(EmailIdentitySource::CreateHere)
        )
    }

    pub fn build(&self, dkim_tokens: &[DkimToken]) -> Result<IdentityStack, VerifierError> {
        let mut graph = ResourceGraph::new();
        let mut verification = None;
        let mut user_pool_email = None;

        if let (Some(domain), Some(domain_name)) = (&self.config.domain, &self.domain_name) {
            let (identity_name, email_identity, dkim_records) = match &domain.identity {
                EmailIdentitySource::CreateHere => {
                    let zone = domain.hosted_zone.as_ref().ok_or_else(|| {
                        VerifierError::configuration(format!(
                            "hosted zone is required to publish DKIM records for '{domain_name}'"
                        ))
                    })?;
                    if dkim_tokens.is_empty() {
                        return Err(VerifierError::configuration(format!(
                            "no DKIM tokens were issued for '{domain_name}'"
                        )));
                    }

                    let identity = graph.add_resource("SesIdentity", ResourceKind::EmailIdentity);
                    let mut records = Vec::new();
                    for (index, record) in plan_dkim_records(domain_name, dkim_tokens, zone)?
                        .into_iter()
                        .enumerate()
                    {
                        let handle = graph
                            .add_resource(format!("DkimRecord{index}"), ResourceKind::DkimRecord);
                        graph.add_dependency(handle, identity)?;
                        records.push((handle, record));
                    }
                    (domain_name.clone(), Some(identity), records)
                }
                EmailIdentitySource::Existing { identity_name } => {
                    (normalize_identity_name(identity_name)?, None, Vec::new())
                }
            };

            let waiter =
                graph.add_resource("SesVerificationWaiter", ResourceKind::VerificationWaiter);
            if let Some(identity) = email_identity {
                graph.add_dependency(waiter, identity)?;
            }
            for (record, _) in &dkim_records {
                graph.add_dependency(waiter, *record)?;
            }

            user_pool_email = Some(UserPoolEmail::for_domain(
                domain_name,
                domain.sender_name.as_deref(),
            ));
            verification = Some(VerificationResources {
                waiter_properties: VerifierProperties {
                    identity_name: Some(identity_name.clone()),
                    max_attempts: self.config.max_attempts,
                    delay_seconds: self.config.delay_seconds,
                },
                identity_name,
                email_identity,
                dkim_records,
                waiter,
            });
        }

        let user_pool = graph.add_resource("UserPool", ResourceKind::UserPool);
        if let Some(verification) = &verification {
            graph.add_dependency(user_pool, verification.waiter)?;
        }
        let user_pool_client = graph.add_resource("UserPoolClient", ResourceKind::UserPoolClient);
        graph.add_dependency(user_pool_client, user_pool)?;

        Ok(IdentityStack {
            graph,
            user_pool,
            user_pool_client,
            verification,
            user_pool_email,
        })
    }
}

fn validate_domain(domain: &DomainSettings) -> Result<String, VerifierError> {
    let domain_name = normalize_identity_name(&domain.domain_name).map_err(|_| {
        VerifierError::configuration(
            "domain name is required when email verification is configured",
        )
    })?;

    if let Some(zone) = &domain.hosted_zone {
        if zone.zone_id.trim().is_empty() {
            return Err(VerifierError::configuration(format!(
                "hosted zone for '{domain_name}' has an empty zone id"
            )));
        }
        let zone_name = zone.zone_name.trim().trim_end_matches('.').to_ascii_lowercase();
        if domain_name != zone_name && !domain_name.ends_with(&format!(".{zone_name}")) {
            return Err(VerifierError::configuration(format!(
                "domain '{domain_name}' is not inside hosted zone '{zone_name}'"
            )));
        }
    } else if domain.identity == EmailIdentitySource::CreateHere {
        return Err(VerifierError::configuration(format!(
            "hosted zone is required to publish DKIM records for '{domain_name}'"
        )));
    }

    Ok(domain_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Vec<DkimToken> {
        ["t1", "t2", "t3"]
            .iter()
            .map(|token| DkimToken::from_easy_dkim(token, "example.com"))
            .collect()
    }

    fn owned_domain_config() -> IdentityStackConfig {
        IdentityStackConfig {
            domain: Some(DomainSettings {
                domain_name: "Example.com".to_string(),
                hosted_zone: Some(ZoneHandle::new("Z123", "example.com")),
                identity: EmailIdentitySource::CreateHere,
                sender_name: None,
            }),
            max_attempts: Some(40),
            delay_seconds: Some(5),
        }
    }

    #[test]
    fn missing_zone_fails_during_plan() {
        let mut config = owned_domain_config();
        if let Some(domain) = config.domain.as_mut() {
            domain.hosted_zone = None;
        }

        let error = IdentityStackPlan::new(config).expect_err("plan should fail fast");
        assert_eq!(error.kind(), "configuration_error");
        assert!(error.to_string().contains("hosted zone is required"));
    }

    #[test]
    fn empty_domain_fails_during_plan() {
        let mut config = owned_domain_config();
        if let Some(domain) = config.domain.as_mut() {
            domain.domain_name = "  ".to_string();
        }

        let error = IdentityStackPlan::new(config).expect_err("plan should fail fast");
        assert!(error.to_string().contains("domain name is required"));
    }

    #[test]
    fn domain_outside_zone_is_rejected() {
        let mut config = owned_domain_config();
        if let Some(domain) = config.domain.as_mut() {
            domain.hosted_zone = Some(ZoneHandle::new("Z123", "example.org"));
        }

        assert!(IdentityStackPlan::new(config).is_err());
    }

    #[test]
    fn user_pool_is_gated_on_waiter_and_records() {
        let stack = IdentityStackPlan::new(owned_domain_config())
            .expect("plan")
            .build(&tokens())
            .expect("stack");

        let verification = stack.verification.as_ref().expect("verification resources");
        assert_eq!(verification.dkim_records.len(), 3);
        assert_eq!(verification.identity_name, "example.com");
        assert_eq!(
            stack.gate(),
            Some(DependencyEdge {
                downstream: stack.user_pool,
                upstream: verification.waiter,
            })
        );

        let order = stack.graph.materialization_order();
        let position = |handle| order.iter().position(|h| *h == handle).expect("in order");
        for (record, _) in &verification.dkim_records {
            assert!(position(*record) < position(verification.waiter));
        }
        assert!(position(verification.waiter) < position(stack.user_pool));
        assert!(position(stack.user_pool) < position(stack.user_pool_client));

        let mut graph = stack.graph.clone();
        assert!(graph
            .add_dependency(verification.waiter, stack.user_pool)
            .is_err());
    }

    #[test]
    fn sender_address_follows_configured_domain() {
        let stack = IdentityStackPlan::new(owned_domain_config())
            .expect("plan")
            .build(&tokens())
            .expect("stack");

        let email = stack.user_pool_email.expect("email settings");
        assert_eq!(email.from_email, "no-reply@example.com");
        assert_eq!(email.reply_to, "no-reply@example.com");
        assert_eq!(email.from_name, DEFAULT_SENDER_NAME);
    }

    #[test]
    fn existing_identity_skips_records_but_keeps_gate() {
        let config = IdentityStackConfig {
            domain: Some(DomainSettings {
                domain_name: "mail.example.com".to_string(),
                hosted_zone: None,
                identity: EmailIdentitySource::Existing {
                    identity_name: "mail.example.com".to_string(),
                },
                sender_name: Some("Ops".to_string()),
            }),
            max_attempts: None,
            delay_seconds: None,
        };

        let plan = IdentityStackPlan::new(config).expect("plan");
        assert!(!plan.creates_identity());
        let stack = plan.build(&[]).expect("stack");

        let verification = stack.verification.as_ref().expect("verification resources");
        assert!(verification.dkim_records.is_empty());
        assert!(verification.email_identity.is_none());
        assert!(stack.graph.depends_on(stack.user_pool, verification.waiter));
        assert_eq!(
            stack.user_pool_email.as_ref().map(|e| e.from_email.as_str()),
            Some("no-reply@mail.example.com")
        );
    }

    #[test]
    fn no_domain_builds_plain_user_pool() {
        let stack = IdentityStackPlan::new(IdentityStackConfig::default())
            .expect("plan")
            .build(&[])
            .expect("stack");

        assert!(stack.verification.is_none());
        assert!(stack.user_pool_email.is_none());
        assert!(stack.gate().is_none());
        assert_eq!(stack.graph.len(), 2);
        assert_eq!(
            stack.graph.node(stack.user_pool).map(|node| node.kind),
            Some(ResourceKind::UserPool)
        );
    }

    #[test]
    fn owned_identity_requires_tokens() {
        let error = IdentityStackPlan::new(owned_domain_config())
            .expect("plan")
            .build(&[])
            .expect_err("empty tokens should fail");
        assert!(error.to_string().contains("no DKIM tokens"));
    }
}
