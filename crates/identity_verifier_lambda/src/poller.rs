use std::time::Duration;

use chrono::Utc;
use identity_verifier_core::contract::{IdentityStatus, OutcomeStatus};
use identity_verifier_core::error::VerifierError;
use tracing::{info, warn};

use crate::adapters::sleeper::Sleeper;
use crate::adapters::status_source::{QueryErrorKind, StatusSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Verified,
    NotVerified(IdentityStatus),
    TransientError {
        kind: QueryErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub result: AttemptResult,
    pub observed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub outcome: OutcomeStatus,
    pub queries: u32,
    pub sleeps: u32,
    pub attempts: Vec<AttemptRecord>,
}

impl PollReport {
    pub fn is_verified(&self) -> bool {
        self.outcome == OutcomeStatus::Verified
    }
}

/// Queries `identity_name` until it is verified or `max_attempts` queries
/// have been made.
///
/// A failed query counts as an attempt and is otherwise treated like any
/// other "not verified yet" answer. The delay is only applied between
/// attempts, never after the last one.
pub fn poll(
    identity_name: &str,
    max_attempts: u32,
    delay: Duration,
    source: &dyn StatusSource,
    sleeper: &dyn Sleeper,
) -> Result<PollReport, VerifierError> {
    if max_attempts == 0 {
        return Err(VerifierError::configuration(
            "max_attempts must be a positive integer",
        ));
    }

    let mut attempts = Vec::new();
    let mut sleeps = 0u32;

    for attempt in 1..=max_attempts {
        let result = match source.query_status(identity_name) {
            Ok(report) if report.status.is_verified() => AttemptResult::Verified,
            Ok(report) => {
                info!(
                    component = "poller",
                    event = "identity_not_verified",
                    identity = identity_name,
                    attempt,
                    max_attempts,
                    status = report.status.as_str(),
                    attributes = ?report.raw_attributes,
                );
                AttemptResult::NotVerified(report.status)
            }
            Err(error) => {
                warn!(
                    component = "poller",
                    event = "status_query_failed",
                    identity = identity_name,
                    attempt,
                    max_attempts,
                    error_class = error.kind.as_str(),
                    error = %error.message,
                );
                AttemptResult::TransientError {
                    kind: error.kind,
                    message: error.message,
                }
            }
        };

        let verified = result == AttemptResult::Verified;
        attempts.push(AttemptRecord {
            attempt,
            result,
            observed_at: Utc::now().to_rfc3339(),
        });

        if verified {
            info!(
                component = "poller",
                event = "identity_verified",
                identity = identity_name,
                attempt,
            );
            return Ok(PollReport {
                outcome: OutcomeStatus::Verified,
                queries: attempt,
                sleeps,
                attempts,
            });
        }

        if attempt < max_attempts {
            sleeper.sleep(delay);
            sleeps += 1;
        }
    }

    warn!(
        component = "poller",
        event = "verification_timed_out",
        identity = identity_name,
        max_attempts,
        delay_ms = delay_ms(delay),
    );
    Ok(PollReport {
        outcome: OutcomeStatus::TimedOut,
        queries: max_attempts,
        sleeps,
        attempts,
    })
}

fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use identity_verifier_core::contract::StatusReport;

    use super::*;
    use crate::adapters::status_source::QueryError;

    struct ScriptedSource {
        answers: Mutex<VecDeque<Result<StatusReport, QueryError>>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(answers: Vec<Result<StatusReport, QueryError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.lock().expect("poisoned mutex").len()
        }
    }

    impl StatusSource for ScriptedSource {
        fn query_status(&self, identity_name: &str) -> Result<StatusReport, QueryError> {
            self.queries
                .lock()
                .expect("poisoned mutex")
                .push(identity_name.to_string());
            self.answers
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Ok(StatusReport::new(IdentityStatus::Pending)))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().expect("poisoned mutex").clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().expect("poisoned mutex").push(duration);
        }
    }

    fn verified() -> Result<StatusReport, QueryError> {
        Ok(StatusReport::new(IdentityStatus::Verified))
    }

    fn pending() -> Result<StatusReport, QueryError> {
        Ok(StatusReport::new(IdentityStatus::Pending))
    }

    fn throttled() -> Result<StatusReport, QueryError> {
        Err(QueryError::new(QueryErrorKind::Throttled, "rate exceeded"))
    }

    #[test]
    fn returns_verified_after_error_and_pending() {
        let source = ScriptedSource::new(vec![throttled(), pending(), verified()]);
        let sleeper = RecordingSleeper::default();

        let report = poll("example.com", 3, Duration::ZERO, &source, &sleeper).expect("poll");

        assert_eq!(report.outcome, OutcomeStatus::Verified);
        assert_eq!(report.queries, 3);
        assert_eq!(source.query_count(), 3);
        assert_eq!(report.sleeps, 2);
        assert!(matches!(
            report.attempts[0].result,
            AttemptResult::TransientError {
                kind: QueryErrorKind::Throttled,
                ..
            }
        ));
    }

    #[test]
    fn times_out_when_never_verified() {
        let source = ScriptedSource::new(vec![pending(), pending()]);
        let sleeper = RecordingSleeper::default();

        let report = poll("example.com", 2, Duration::ZERO, &source, &sleeper).expect("poll");

        assert_eq!(report.outcome, OutcomeStatus::TimedOut);
        assert_eq!(source.query_count(), 2);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[test]
    fn stops_at_first_verified_answer_without_trailing_sleep() {
        let delay = Duration::from_secs(5);
        for k in 1..=5u32 {
            let mut answers: Vec<_> = (1..k).map(|_| pending()).collect();
            answers.push(verified());
            let source = ScriptedSource::new(answers);
            let sleeper = RecordingSleeper::default();

            let report = poll("example.com", 5, delay, &source, &sleeper).expect("poll");

            assert!(report.is_verified());
            assert_eq!(source.query_count(), k as usize);
            assert_eq!(sleeper.sleeps(), vec![delay; (k - 1) as usize]);
        }
    }

    #[test]
    fn exhaustion_uses_every_attempt_and_one_fewer_sleep() {
        let delay = Duration::from_millis(250);
        let source = ScriptedSource::new(Vec::new());
        let sleeper = RecordingSleeper::default();

        let report = poll("example.com", 40, delay, &source, &sleeper).expect("poll");

        assert_eq!(report.outcome, OutcomeStatus::TimedOut);
        assert_eq!(report.queries, 40);
        assert_eq!(report.attempts.len(), 40);
        assert_eq!(sleeper.sleeps(), vec![delay; 39]);
    }

    #[test]
    fn errors_only_change_the_attempt_count() {
        let clean = ScriptedSource::new(vec![pending(), verified()]);
        let noisy = ScriptedSource::new(vec![
            throttled(),
            Err(QueryError::new(QueryErrorKind::AccessDenied, "denied")),
            pending(),
            verified(),
        ]);
        let sleeper = RecordingSleeper::default();

        let clean_report = poll("example.com", 10, Duration::ZERO, &clean, &sleeper).expect("poll");
        let noisy_report = poll("example.com", 10, Duration::ZERO, &noisy, &sleeper).expect("poll");

        assert_eq!(clean_report.outcome, noisy_report.outcome);
        assert_eq!(clean_report.queries, 2);
        assert_eq!(noisy_report.queries, 4);
    }

    #[test]
    fn rejects_zero_attempt_budget() {
        let source = ScriptedSource::new(vec![verified()]);
        let sleeper = RecordingSleeper::default();

        let error = poll("example.com", 0, Duration::ZERO, &source, &sleeper)
            .expect_err("zero attempts should fail");

        assert_eq!(error.kind(), "configuration_error");
        assert_eq!(source.query_count(), 0);
    }

    #[test]
    fn logged_delay_saturates_instead_of_wrapping() {
        assert_eq!(delay_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(delay_ms(Duration::MAX), u64::MAX);
    }
}
