pub mod aws;
pub mod dns;
pub mod email_identity;
pub mod response;
pub mod sleeper;
pub mod status_source;
