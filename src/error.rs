//! Rich diagnostic error types for the akh kernel.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so callers know exactly what went wrong
//! and how to fix it. Compile failures live next to the compiler in
//! [`crate::program::error`]; config and path failures next to their modules.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::limits::DenyReason;
use crate::paths::PathError;
use crate::program::CompileError;

/// Top-level error type for the kernel façade.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error("admission denied: {reason}")]
    #[diagnostic(
        code(akh::kernel::admission_denied),
        help(
            "The limits policy refused this operation. Retract facts, reset the \
             session, or raise the corresponding limit in the kernel config."
        )
    )]
    AdmissionDenied { reason: DenyReason },

    #[error("invalid fact: {message}")]
    #[diagnostic(
        code(akh::kernel::invalid_fact),
        help(
            "The fact does not match its predicate declaration. Check the \
             argument count and the declared argument types."
        )
    )]
    InvalidFact { message: String },

    #[error("source watcher failed: {message}")]
    #[diagnostic(
        code(akh::kernel::watch),
        help(
            "The layer files could not be watched. Check that the kernel root \
             exists and that the platform file notification limit is not reached."
        )
    )]
    Watch { message: String },
}

// ---------------------------------------------------------------------------
// Eval errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EvalError {
    #[error("unknown goal predicate: \"{goal}\"")]
    #[diagnostic(
        code(akh::eval::unknown_goal),
        help(
            "The goal must be a predicate declared in the schema or policy \
             layer, or the head of a learned rule."
        )
    )]
    UnknownGoal { goal: String },

    #[error("derived fact capacity exceeded: {projected} > {limit}")]
    #[diagnostic(
        code(akh::eval::capacity_exceeded),
        help(
            "Evaluation would derive more facts than `max_derived_facts` allows. \
             No partial result is returned. Narrow the goal, check the rules \
             for unintended cross products, or raise the limit."
        )
    )]
    CapacityExceeded { limit: usize, projected: usize },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(akh::store::io),
        help(
            "A filesystem operation failed. Check that the kernel root exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(akh::store::redb),
        help(
            "The session fact mirror encountered a transaction error. \
             This may indicate corruption: delete session.redb to start a \
             fresh session."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(akh::store::serde),
        help(
            "Failed to serialize or deserialize a mirrored fact. \
             This usually means the stored format changed between versions. \
             Reset the session and reload its facts."
        )
    )]
    Serialization { message: String },
}

/// Convenience alias for kernel results.
pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Result type for evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
