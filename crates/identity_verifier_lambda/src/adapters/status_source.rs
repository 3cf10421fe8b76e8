use identity_verifier_core::contract::StatusReport;

pub trait StatusSource {
    fn query_status(&self, identity_name: &str) -> Result<StatusReport, QueryError>;
}

/// Coarse class of a failed status query. Used for logging only; the poller
/// treats every class as "not verified yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Throttled,
    AccessDenied,
    NotFound,
    Network,
    Service,
}

impl QueryErrorKind {
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("TooManyRequestsException" | "ThrottlingException" | "Throttling") => {
                Self::Throttled
            }
            Some("AccessDeniedException" | "AccessDenied" | "UnauthorizedOperation") => {
                Self::AccessDenied
            }
            Some("NotFoundException" | "NotFound") => Self::NotFound,
            Some(_) => Self::Service,
            None => Self::Network,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::AccessDenied => "access_denied",
            Self::NotFound => "not_found",
            Self::Network => "network",
            Self::Service => "service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind.as_str())
    }
}

impl std::error::Error for QueryError {}
