//! Bounded repair loop between a rule proposer and the kernel.
//!
//! Each attempt asks a [`RuleProposer`] (typically an LLM client) for one
//! candidate rule, offers it to a [`RuleSink`] (the kernel), and feeds any
//! rejection diagnostic into the next request. The loop ends on the first
//! accepted rule, after `max_attempts`, or when time runs out.
//!
//! The proposer runs on a worker thread so a slow proposer can be abandoned.
//! An abandoned worker's late answer goes to a closed channel and is dropped.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;

use crate::error::KernelResult;
use crate::hotload::HotLoadOutcome;
use crate::program::SourceDiagnostic;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Failure reported by a proposer.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ProposerError {
    #[error("proposer failed: {message}")]
    #[diagnostic(
        code(akh::feedback::proposer_failed),
        help("The rule proposer could not produce a candidate. The attempt counts as failed.")
    )]
    Failed { message: String },
}

impl ProposerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// What the proposer is told before each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairRequest {
    /// 1-based attempt number.
    pub attempt: usize,
    pub max_attempts: usize,
    /// Candidate from the previous attempt, if it got that far.
    pub previous_candidate: Option<String>,
    /// Why the previous candidate was rejected.
    pub previous_diagnostic: Option<SourceDiagnostic>,
    /// Time left before the loop's deadline.
    pub time_remaining: Duration,
}

impl RepairRequest {
    /// Repair hint for the proposer: the failed candidate and its diagnostic.
    pub fn repair_hint(&self) -> Option<String> {
        let diagnostic = self.previous_diagnostic.as_ref()?;
        let candidate = self.previous_candidate.as_deref().unwrap_or("");
        let mut hint = format!("The rule\n\n    {candidate}\n\nwas rejected: {diagnostic}");
        if let Some(expected) = &diagnostic.expected {
            hint.push_str(&format!(" (expected {expected})"));
        }
        Some(hint)
    }
}

/// Produces candidate rule text. Implemented by the LLM client.
pub trait RuleProposer: Send + Sync {
    fn propose(&self, request: &RepairRequest) -> Result<String, ProposerError>;
}

/// Accepts or rejects candidate rules. Implemented by the kernel.
pub trait RuleSink {
    fn submit(&self, candidate: &str) -> KernelResult<HotLoadOutcome>;
}

// ---------------------------------------------------------------------------
// Configuration and report types
// ---------------------------------------------------------------------------

/// Timing knobs for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackConfig {
    /// Longest wait for one proposer answer (default: 30s).
    pub per_attempt_timeout: Duration,
    /// An attempt is not started with less time than this left (default: 500ms).
    pub min_attempt_time: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout: Duration::from_secs(30),
            min_attempt_time: Duration::from_millis(500),
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted,
    Rejected(SourceDiagnostic),
    ProposerFailed(String),
    TimedOut,
}

/// Record of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackAttempt {
    /// 1-based attempt number.
    pub number: usize,
    /// The proposed text, when the proposer produced one.
    pub candidate: Option<String>,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// A candidate was accepted into the learned layer.
    Accepted,
    /// Every allowed attempt was used without an acceptance.
    BudgetExhausted,
    /// Not enough time was left for another attempt.
    DeadlineExhausted,
    /// The proposer did not answer within the per-attempt timeout.
    AttemptTimedOut,
    /// The kernel failed to persist an accepted rule.
    SinkFailed(String),
}

/// Full account of a loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackReport {
    pub outcome: FeedbackOutcome,
    pub attempts: Vec<FeedbackAttempt>,
}

impl FeedbackReport {
    pub fn is_accepted(&self) -> bool {
        self.outcome == FeedbackOutcome::Accepted
    }

    /// The candidate that was accepted, if any.
    pub fn accepted_candidate(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Accepted)
            .and_then(|a| a.candidate.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the repair loop until acceptance, `max_attempts`, or `deadline`.
pub fn run_feedback_loop<S: RuleSink + ?Sized>(
    sink: &S,
    proposer: Arc<dyn RuleProposer>,
    config: &FeedbackConfig,
    deadline: Instant,
    max_attempts: usize,
) -> FeedbackReport {
    let mut attempts: Vec<FeedbackAttempt> = Vec::with_capacity(max_attempts.min(16));
    let mut previous_candidate = None;
    let mut previous_diagnostic = None;

    for number in 1..=max_attempts {
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        if remaining.is_zero() || remaining < config.min_attempt_time {
            return finish(FeedbackOutcome::DeadlineExhausted, attempts);
        }

        let request = RepairRequest {
            attempt: number,
            max_attempts,
            previous_candidate: previous_candidate.take(),
            previous_diagnostic: previous_diagnostic.take(),
            time_remaining: remaining,
        };

        let per_attempt_binding = config.per_attempt_timeout <= remaining;
        let wait = config.per_attempt_timeout.min(remaining);
        let answer = ask(Arc::clone(&proposer), request, wait);

        let (candidate, outcome) = match answer {
            Ok(Ok(candidate)) => match sink.submit(&candidate) {
                Ok(HotLoadOutcome::Accepted { .. }) => (Some(candidate), AttemptOutcome::Accepted),
                Ok(HotLoadOutcome::Rejected(diagnostic)) => {
                    (Some(candidate), AttemptOutcome::Rejected(diagnostic))
                }
                Err(e) => {
                    tracing::warn!(attempt = number, error = %e, "rule sink failed");
                    return finish(FeedbackOutcome::SinkFailed(e.to_string()), attempts);
                }
            },
            Ok(Err(e)) => (None, AttemptOutcome::ProposerFailed(e.to_string())),
            Err(RecvTimeoutError::Timeout) => (None, AttemptOutcome::TimedOut),
            Err(RecvTimeoutError::Disconnected) => (
                None,
                AttemptOutcome::ProposerFailed("proposer exited without an answer".to_string()),
            ),
        };

        tracing::debug!(attempt = number, outcome = ?outcome, "feedback attempt");
        attempts.push(FeedbackAttempt {
            number,
            candidate: candidate.clone(),
            outcome: outcome.clone(),
            elapsed: started.elapsed(),
        });

        match outcome {
            AttemptOutcome::Accepted => return finish(FeedbackOutcome::Accepted, attempts),
            AttemptOutcome::TimedOut => {
                let terminal = if per_attempt_binding {
                    FeedbackOutcome::AttemptTimedOut
                } else {
                    FeedbackOutcome::DeadlineExhausted
                };
                return finish(terminal, attempts);
            }
            AttemptOutcome::Rejected(diagnostic) => {
                previous_candidate = candidate;
                previous_diagnostic = Some(diagnostic);
            }
            AttemptOutcome::ProposerFailed(_) => {}
        }
    }

    finish(FeedbackOutcome::BudgetExhausted, attempts)
}

/// Ask the proposer on a worker thread and wait at most `wait`.
fn ask(
    proposer: Arc<dyn RuleProposer>,
    request: RepairRequest,
    wait: Duration,
) -> Result<Result<String, ProposerError>, RecvTimeoutError> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        // The receiver is gone if the loop stopped waiting.
        let _ = tx.send(proposer.propose(&request));
    });
    rx.recv_timeout(wait)
}

fn finish(outcome: FeedbackOutcome, attempts: Vec<FeedbackAttempt>) -> FeedbackReport {
    tracing::info!(outcome = ?outcome, attempts = attempts.len(), "feedback loop finished");
    FeedbackReport { outcome, attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{DiagnosticCode, Layer, Position};
    use std::sync::Mutex;

    /// Accepts any candidate containing `ok`.
    struct Sink;

    impl RuleSink for Sink {
        fn submit(&self, candidate: &str) -> KernelResult<HotLoadOutcome> {
            if candidate.contains("ok") {
                Ok(HotLoadOutcome::Accepted {
                    rule: candidate.to_string(),
                    learned_rule_count: 1,
                })
            } else {
                Ok(HotLoadOutcome::Rejected(SourceDiagnostic::semantic(
                    Layer::Learned,
                    Position::new(1, 0),
                    DiagnosticCode::UndeclaredPredicate,
                    "predicate 'bad' is not declared",
                )))
            }
        }
    }

    /// Returns its scripted answers in order, recording every request.
    struct Scripted {
        answers: Mutex<Vec<Result<String, ProposerError>>>,
        requests: Mutex<Vec<RepairRequest>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String, ProposerError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl RuleProposer for Scripted {
        fn propose(&self, request: &RepairRequest) -> Result<String, ProposerError> {
            self.requests.lock().unwrap().push(request.clone());
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("bad(X).".to_string()))
        }
    }

    struct Sleepy(Duration);

    impl RuleProposer for Sleepy {
        fn propose(&self, _: &RepairRequest) -> Result<String, ProposerError> {
            std::thread::sleep(self.0);
            Ok("ok(1).".to_string())
        }
    }

    fn ample() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn zero_attempts_is_budget_exhausted() {
        let proposer = Scripted::new(vec![]);
        let report = run_feedback_loop(&Sink, proposer.clone(), &FeedbackConfig::default(), ample(), 0);
        assert_eq!(report.outcome, FeedbackOutcome::BudgetExhausted);
        assert!(report.attempts.is_empty());
        assert!(proposer.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn always_rejected_uses_every_attempt() {
        let proposer = Scripted::new(vec![]);
        let report = run_feedback_loop(&Sink, proposer.clone(), &FeedbackConfig::default(), ample(), 3);
        assert_eq!(report.outcome, FeedbackOutcome::BudgetExhausted);
        assert_eq!(report.attempts.len(), 3);
        assert!(report
            .attempts
            .iter()
            .all(|a| matches!(a.outcome, AttemptOutcome::Rejected(_))));

        let requests = proposer.requests.lock().unwrap();
        assert!(requests[0].previous_diagnostic.is_none());
        assert_eq!(requests[1].previous_candidate.as_deref(), Some("bad(X)."));
        assert!(requests[1].repair_hint().unwrap().contains("1:0 predicate 'bad'"));
    }

    #[test]
    fn stops_on_first_acceptance() {
        let proposer = Scripted::new(vec![Ok("bad(1).".into()), Ok("ok(1).".into())]);
        let report = run_feedback_loop(&Sink, proposer, &FeedbackConfig::default(), ample(), 5);
        assert!(report.is_accepted());
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.accepted_candidate(), Some("ok(1)."));
    }

    #[test]
    fn proposer_errors_count_as_attempts() {
        let proposer = Scripted::new(vec![
            Err(ProposerError::failed("rate limited")),
            Ok("ok(1).".into()),
        ]);
        let report = run_feedback_loop(&Sink, proposer, &FeedbackConfig::default(), ample(), 2);
        assert!(report.is_accepted());
        assert!(matches!(
            &report.attempts[0].outcome,
            AttemptOutcome::ProposerFailed(m) if m.contains("rate limited")
        ));
    }

    #[test]
    fn slow_proposer_times_out() {
        let config = FeedbackConfig {
            per_attempt_timeout: Duration::from_millis(50),
            min_attempt_time: Duration::from_millis(10),
        };
        let proposer = Arc::new(Sleepy(Duration::from_millis(500)));
        let report = run_feedback_loop(&Sink, proposer, &config, ample(), 3);
        assert_eq!(report.outcome, FeedbackOutcome::AttemptTimedOut);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::TimedOut);
    }

    #[test]
    fn deadline_cuts_a_slow_attempt() {
        let config = FeedbackConfig {
            per_attempt_timeout: Duration::from_secs(10),
            min_attempt_time: Duration::from_millis(10),
        };
        let proposer = Arc::new(Sleepy(Duration::from_millis(500)));
        let deadline = Instant::now() + Duration::from_millis(100);
        let report = run_feedback_loop(&Sink, proposer, &config, deadline, 3);
        assert_eq!(report.outcome, FeedbackOutcome::DeadlineExhausted);
        assert_eq!(report.attempts.len(), 1);
    }

    #[test]
    fn past_deadline_makes_no_attempt() {
        let proposer = Scripted::new(vec![]);
        let report = run_feedback_loop(
            &Sink,
            proposer.clone(),
            &FeedbackConfig::default(),
            Instant::now(),
            3,
        );
        assert_eq!(report.outcome, FeedbackOutcome::DeadlineExhausted);
        assert!(report.attempts.is_empty());
        assert!(proposer.requests.lock().unwrap().is_empty());
    }

    /// Sleeps, then returns a rejected candidate, counting calls.
    struct SlowRejecter {
        delay: Duration,
        calls: Mutex<usize>,
    }

    impl RuleProposer for SlowRejecter {
        fn propose(&self, _: &RepairRequest) -> Result<String, ProposerError> {
            *self.calls.lock().unwrap() += 1;
            std::thread::sleep(self.delay);
            Ok("bad(X).".to_string())
        }
    }

    #[test]
    fn rejection_near_deadline_skips_next_attempt() {
        let config = FeedbackConfig {
            per_attempt_timeout: Duration::from_secs(5),
            min_attempt_time: Duration::from_millis(500),
        };
        let proposer = Arc::new(SlowRejecter {
            delay: Duration::from_millis(300),
            calls: Mutex::new(0),
        });
        // 700ms left at the start, about 400ms after the first rejection.
        let deadline = Instant::now() + Duration::from_millis(700);
        let report = run_feedback_loop(&Sink, proposer.clone(), &config, deadline, 3);

        assert_eq!(report.outcome, FeedbackOutcome::DeadlineExhausted);
        assert_eq!(report.attempts.len(), 1);
        assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Rejected(_)));
        assert_eq!(*proposer.calls.lock().unwrap(), 1);
    }
}
