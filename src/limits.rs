//! Admission control for kernel growth.
//!
//! The [`LimitsEnforcer`] answers one question per operation: may it proceed?
//! A denial is an ordinary value ([`Admission::Deny`]); the kernel façade
//! turns it into [`KernelError::AdmissionDenied`] before any state changes.
//!
//! [`KernelError::AdmissionDenied`]: crate::error::KernelError::AdmissionDenied

use std::fmt;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Resource ceilings, fixed for the lifetime of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsPolicy {
    /// Maximum extensional facts held by the session (default: 100 000).
    pub max_facts: usize,
    /// Maximum facts one evaluation may derive (default: 50 000).
    pub max_derived_facts: usize,
    /// Maximum wall-clock age of a session (default: 8 hours).
    pub max_session_duration: Duration,
    /// Approximate memory ceiling for stored facts (default: 256 MiB).
    pub max_memory_bytes: usize,
}

impl Default for LimitsPolicy {
    fn default() -> Self {
        Self {
            max_facts: 100_000,
            max_derived_facts: 50_000,
            max_session_duration: Duration::from_secs(8 * 60 * 60),
            max_memory_bytes: 256 * 1024 * 1024,
        }
    }
}

impl LimitsPolicy {
    /// A policy that never denies anything.
    pub fn unlimited() -> Self {
        Self {
            max_facts: usize::MAX,
            max_derived_facts: usize::MAX,
            max_session_duration: Duration::MAX,
            max_memory_bytes: usize::MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Operations and verdicts
// ---------------------------------------------------------------------------

/// An operation asking for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOp {
    /// Add `incoming` fresh facts to a session holding `current`, bringing
    /// stored facts to roughly `projected_bytes`.
    LoadFacts {
        current: usize,
        incoming: usize,
        projected_bytes: usize,
    },
    /// One evaluation is about to hold `projected` derived facts.
    Derive { projected: usize },
    /// Whether the session itself is still within its lifetime.
    Session,
}

/// Why an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    FactLimit { limit: usize, projected: usize },
    MemoryLimit { limit: usize, projected: usize },
    DerivedLimit { limit: usize, projected: usize },
    SessionExpired { limit: Duration, elapsed: Duration },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FactLimit { limit, projected } => {
                write!(f, "fact limit {limit} would be exceeded ({projected} facts)")
            }
            Self::MemoryLimit { limit, projected } => {
                write!(f, "memory limit {limit} bytes would be exceeded ({projected} bytes)")
            }
            Self::DerivedLimit { limit, projected } => write!(
                f,
                "derived fact limit {limit} would be exceeded ({projected} facts)"
            ),
            Self::SessionExpired { limit, elapsed } => write!(
                f,
                "session expired after {}s (limit {}s)",
                elapsed.as_secs(),
                limit.as_secs()
            ),
        }
    }
}

/// Verdict for one [`AdmissionOp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny(DenyReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// `Ok(())` on allow, the reason on deny.
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Enforcer
// ---------------------------------------------------------------------------

/// Checks operations against a [`LimitsPolicy`].
#[derive(Debug, Clone)]
pub struct LimitsEnforcer {
    policy: LimitsPolicy,
    started: Instant,
}

impl LimitsEnforcer {
    /// Start enforcing `policy`; the session clock starts now.
    pub fn new(policy: LimitsPolicy) -> Self {
        Self::with_start(policy, Instant::now())
    }

    /// Enforce `policy` for a session that started at `started`.
    pub fn with_start(policy: LimitsPolicy, started: Instant) -> Self {
        Self { policy, started }
    }

    pub fn policy(&self) -> &LimitsPolicy {
        &self.policy
    }

    /// Time since the session started.
    pub fn session_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Decide whether `op` may proceed.
    pub fn check(&self, op: AdmissionOp) -> Admission {
        let verdict = match op {
            AdmissionOp::LoadFacts {
                current,
                incoming,
                projected_bytes,
            } => {
                let projected = current.saturating_add(incoming);
                if projected > self.policy.max_facts {
                    Admission::Deny(DenyReason::FactLimit {
                        limit: self.policy.max_facts,
                        projected,
                    })
                } else if projected_bytes > self.policy.max_memory_bytes {
                    Admission::Deny(DenyReason::MemoryLimit {
                        limit: self.policy.max_memory_bytes,
                        projected: projected_bytes,
                    })
                } else {
                    Admission::Allow
                }
            }
            AdmissionOp::Derive { projected } => {
                if projected > self.policy.max_derived_facts {
                    Admission::Deny(DenyReason::DerivedLimit {
                        limit: self.policy.max_derived_facts,
                        projected,
                    })
                } else {
                    Admission::Allow
                }
            }
            AdmissionOp::Session => {
                let elapsed = self.session_elapsed();
                if elapsed > self.policy.max_session_duration {
                    Admission::Deny(DenyReason::SessionExpired {
                        limit: self.policy.max_session_duration,
                        elapsed,
                    })
                } else {
                    Admission::Allow
                }
            }
        };

        if let Admission::Deny(reason) = &verdict {
            tracing::debug!(?op, %reason, "admission denied");
        }
        verdict
    }
}
