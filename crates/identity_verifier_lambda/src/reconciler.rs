use std::collections::HashSet;

use identity_verifier_core::dkim::{plan_dkim_records, DkimRecord, DkimToken, ZoneHandle};
use identity_verifier_core::error::VerifierError;
use tracing::info;

use crate::adapters::dns::DnsRecordWriter;

/// Publishes one CNAME per DKIM token into `zone`.
///
/// Without a zone nothing is written and the call fails with a configuration
/// error: verification could never succeed, and a timeout minutes later would
/// hide the cause.
pub fn reconcile_dkim_records(
    domain: &str,
    tokens: &[DkimToken],
    zone: Option<&ZoneHandle>,
    writer: &dyn DnsRecordWriter,
) -> Result<Vec<DkimRecord>, VerifierError> {
    let zone = zone.ok_or_else(|| {
        VerifierError::configuration(format!(
            "no hosted zone available for '{domain}'; DKIM records cannot be created"
        ))
    })?;

    let records = plan_dkim_records(domain, tokens, zone)?;
    write_records(&records, writer)?;
    Ok(records)
}

/// Writes each distinct record exactly once.
pub fn write_records(
    records: &[DkimRecord],
    writer: &dyn DnsRecordWriter,
) -> Result<usize, VerifierError> {
    let mut written = HashSet::new();
    for record in records {
        let fqdn = record.fqdn().to_ascii_lowercase();
        if !written.insert((record.zone.zone_id.clone(), fqdn)) {
            continue;
        }

        writer.upsert_cname(record).map_err(VerifierError::dns)?;
        info!(
            component = "reconciler",
            event = "dkim_record_upserted",
            zone_id = %record.zone.zone_id,
            record_name = %record.record_name,
            record_value = %record.record_value,
        );
    }
    Ok(written.len())
}
