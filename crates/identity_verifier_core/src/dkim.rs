//! DKIM record naming and planning.
//!
//! The email service hands out one token per DKIM selector. Each token is
//! published as a CNAME under the sending domain, inside the hosted zone that
//! owns it. This module turns tokens into those records.

use serde::{Deserialize, Serialize};

use crate::error::VerifierError;

pub const EASY_DKIM_VALUE_SUFFIX: &str = "dkim.amazonses.com";
pub const DKIM_RECORD_TTL_SECONDS: i64 = 1800;

/// Hosted zone the DKIM records are written into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ZoneHandle {
    pub zone_id: String,
    pub zone_name: String,
}

impl ZoneHandle {
    pub fn new(zone_id: impl Into<String>, zone_name: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            zone_name: zone_name.into(),
        }
    }
}

/// Token as returned by the email service: a fully-qualified record name and
/// the CNAME target it must resolve to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DkimToken {
    pub name: String,
    pub value: String,
}

impl DkimToken {
    /// Expands a bare Easy DKIM token into its record name and target.
    pub fn from_easy_dkim(token: &str, domain: &str) -> Self {
        let token = token.trim();
        let domain = trim_domain(domain);
        Self {
            name: format!("{token}._domainkey.{domain}"),
            value: format!("{token}.{EASY_DKIM_VALUE_SUFFIX}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DkimRecord {
    /// Name relative to `domain`, e.g. `abc._domainkey`.
    pub record_name: String,
    pub record_value: String,
    pub domain: String,
    pub zone: ZoneHandle,
}

impl DkimRecord {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.record_name, trim_domain(&self.domain))
    }
}

/// Strips the `.{domain}` suffix from a token's fully-qualified name.
///
/// Matching is case-insensitive and ignores a trailing root dot. Names that do
/// not sit under `domain` are rejected.
pub fn derive_record_name(token_name: &str, domain: &str) -> Result<String, VerifierError> {
    let name = trim_domain(token_name);
    let domain = trim_domain(domain);
    if domain.is_empty() {
        return Err(VerifierError::configuration(
            "domain name is required to derive DKIM record names",
        ));
    }

    let suffix = format!(".{domain}");
    let name_lower = name.to_ascii_lowercase();
    let suffix_lower = suffix.to_ascii_lowercase();
    if name_lower.len() <= suffix_lower.len() || !name_lower.ends_with(&suffix_lower) {
        return Err(VerifierError::configuration(format!(
            "DKIM token '{token_name}' is not a record under domain '{domain}'"
        )));
    }

    Ok(name[..name.len() - suffix.len()].to_string())
}

/// Plans one record per distinct token, preserving token order.
pub fn plan_dkim_records(
    domain: &str,
    tokens: &[DkimToken],
    zone: &ZoneHandle,
) -> Result<Vec<DkimRecord>, VerifierError> {
    let mut records: Vec<DkimRecord> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let record_name = derive_record_name(&token.name, domain)?;
        let record_value = trim_domain(&token.value).to_string();
        if record_value.is_empty() {
            return Err(VerifierError::configuration(format!(
                "DKIM token '{}' has an empty value",
                token.name
            )));
        }

        if let Some(existing) = records
            .iter()
            .find(|record| record.record_name.eq_ignore_ascii_case(&record_name))
        {
            if existing.record_value != record_value {
                return Err(VerifierError::configuration(format!(
                    "DKIM record '{record_name}' has conflicting values '{}' and '{record_value}'",
                    existing.record_value
                )));
            }
            continue;
        }

        records.push(DkimRecord {
            record_name,
            record_value,
            domain: trim_domain(domain).to_ascii_lowercase(),
            zone: zone.clone(),
        });
    }
    Ok(records)
}

fn trim_domain(value: &str) -> &str {
    value.trim().trim_end_matches('.')
}
