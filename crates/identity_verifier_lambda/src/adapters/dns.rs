use identity_verifier_core::dkim::DkimRecord;

pub trait DnsRecordWriter {
    /// Creates or replaces the CNAME described by `record`.
    fn upsert_cname(&self, record: &DkimRecord) -> Result<(), String>;
}
