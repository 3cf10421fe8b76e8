use identity_verifier_core::dkim::DkimToken;

pub trait EmailIdentityProvisioner {
    /// Creates the domain identity, or reads the existing one, and returns the
    /// DKIM tokens that must be published for it.
    fn ensure_domain_identity(&self, domain: &str) -> Result<Vec<DkimToken>, String>;
}
