//! Hot rule loading: compile one candidate clause against the live layers.
//!
//! The expensive part, [`prepare`], is pure and runs outside the kernel lock.
//! The kernel then takes its exclusive lock, checks that the layers it
//! compiled against are still current, appends the candidate to the learned
//! layer file with [`append_learned`], and swaps the program.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::StoreError;
use crate::program::{Clause, CompileResult, Program, SourceDiagnostic, Sources};
use crate::store::StoreResult;

/// Result of offering one rule to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum HotLoadOutcome {
    /// The rule is part of the live program.
    Accepted {
        /// The accepted clause, rendered back to source.
        rule: String,
        /// Learned-layer clause count after the swap.
        learned_rule_count: usize,
    },
    /// The rule was refused; nothing changed.
    Rejected(SourceDiagnostic),
}

impl HotLoadOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn diagnostic(&self) -> Option<&SourceDiagnostic> {
        match self {
            Self::Rejected(d) => Some(d),
            Self::Accepted { .. } => None,
        }
    }
}

/// A compiled candidate, ready to be swapped in.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Layers with the candidate appended to the learned layer.
    pub sources: Sources,
    pub program: Program,
    pub clause: Clause,
    /// Candidate text as it is appended to the learned layer.
    pub text: String,
}

/// Compile `candidate` on top of `sources`.
pub fn prepare(sources: &Sources, candidate: &str) -> CompileResult<Prepared> {
    let (program, clause) = Program::compile_with_candidate(sources, candidate)?;
    Ok(Prepared {
        sources: sources.with_learned_rule(candidate),
        program,
        clause,
        text: candidate.trim().to_string(),
    })
}

/// Append one accepted rule to the learned layer file and flush it to disk.
pub fn append_learned(path: &Path, text: &str) -> StoreResult<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::Io { source: e })?;

    // Keep one rule per line even if the file was edited by hand.
    let needs_newline = file
        .metadata()
        .map(|m| m.len() > 0)
        .map_err(|e| StoreError::Io { source: e })?
        && !ends_with_newline(path)?;

    let mut line = String::with_capacity(text.len() + 2);
    if needs_newline {
        line.push('\n');
    }
    line.push_str(text.trim());
    line.push('\n');

    file.write_all(line.as_bytes())
        .map_err(|e| StoreError::Io { source: e })?;
    file.sync_all().map_err(|e| StoreError::Io { source: e })?;
    Ok(())
}

fn ends_with_newline(path: &Path) -> StoreResult<bool> {
    let bytes = std::fs::read(path).map_err(|e| StoreError::Io { source: e })?;
    Ok(bytes.last().is_none_or(|b| *b == b'\n'))
}
