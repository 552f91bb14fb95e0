//! Derived-fact cache with a count-based consistency check.
//!
//! The cache remembers the signature `(fact count, derived count)` it was
//! built against. Before every evaluation the current signature is compared
//! with it; on a mismatch the whole cache is discarded (a *desync*) and the
//! evaluation recomputes. Writers also invalidate explicitly, in the same
//! exclusive section as their mutation, so the count heuristic is a second
//! line rather than the only one.

use std::collections::HashMap;

use crate::eval::{EvalContext, Evaluation};

/// Counts the cache was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheSignature {
    pub fact_count: usize,
    pub derived_count: usize,
}

/// One cached evaluation: a goal under a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub goal: String,
    pub context: EvalContext,
}

impl CacheKey {
    pub fn new(goal: &str, context: &EvalContext) -> Self {
        Self {
            goal: goal.to_string(),
            context: context.clone(),
        }
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A valid cached evaluation.
    Hit(Evaluation),
    /// Nothing cached for this key.
    Miss,
    /// The signature no longer matches; the cache has been emptied.
    Desync {
        expected: CacheSignature,
        found: CacheSignature,
    },
}

/// Marks the cache generation an evaluation started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Cache of evaluations for the current program and fact set.
#[derive(Debug, Default)]
pub struct DerivedCache {
    entries: HashMap<CacheKey, Evaluation>,
    /// Signature of the populated cache; `None` while empty.
    built_against: Option<CacheSignature>,
    derived_count: usize,
    generation: u64,
    desyncs: u64,
}

impl DerivedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current signature for a store holding `fact_count` facts.
    pub fn signature(&self, fact_count: usize) -> CacheSignature {
        CacheSignature {
            fact_count,
            derived_count: self.derived_count,
        }
    }

    /// Look up `key`, checking the signature first.
    pub fn lookup(&mut self, key: &CacheKey, fact_count: usize) -> CacheLookup {
        let Some(expected) = self.built_against else {
            return CacheLookup::Miss;
        };
        let found = self.signature(fact_count);
        if found != expected {
            self.desyncs += 1;
            self.reset();
            return CacheLookup::Desync { expected, found };
        }
        match self.entries.get(key) {
            Some(evaluation) => {
                let mut evaluation = evaluation.clone();
                evaluation.from_cache = true;
                CacheLookup::Hit(evaluation)
            }
            None => CacheLookup::Miss,
        }
    }

    /// The generation an evaluation starting now belongs to.
    pub fn generation(&self) -> Generation {
        Generation(self.generation)
    }

    /// Store an evaluation computed during `started`. Dropped (returns
    /// `false`) if a writer invalidated the cache in the meantime.
    pub fn store(
        &mut self,
        started: Generation,
        key: CacheKey,
        evaluation: Evaluation,
        fact_count: usize,
    ) -> bool {
        if started.0 != self.generation {
            return false;
        }
        if let Some(previous) = self.entries.remove(&key) {
            self.derived_count -= previous.derived_count;
        }
        self.derived_count += evaluation.derived_count;
        self.entries.insert(key, evaluation);
        self.built_against = Some(self.signature(fact_count));
        true
    }

    /// Discard everything. Called by every writer.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.reset();
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.built_against = None;
        self.derived_count = 0;
    }

    /// Total derived facts held by cached evaluations.
    pub fn derived_count(&self) -> usize {
        self.derived_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Desyncs detected since creation.
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }
}
