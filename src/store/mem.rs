//! In-memory extensional fact set.
//!
//! Facts are grouped by predicate in ordered maps so lookups by predicate are
//! cheap and iteration order is deterministic. Not synchronized: the kernel
//! guards it with its state lock.

use std::collections::{BTreeMap, BTreeSet};

use crate::fact::Fact;

/// Set of ground facts indexed by predicate.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    by_predicate: BTreeMap<String, BTreeSet<Fact>>,
    len: usize,
    bytes: usize,
}

impl FactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fact. Returns `false` if an equal fact is already stored, in
    /// which case the stored fact (and its provenance) is kept.
    pub fn insert(&mut self, fact: Fact) -> bool {
        let bytes = fact.estimated_bytes();
        let inserted = self
            .by_predicate
            .entry(fact.predicate.clone())
            .or_default()
            .insert(fact);
        if inserted {
            self.len += 1;
            self.bytes += bytes;
        }
        inserted
    }

    /// Check if an equal fact is stored.
    pub fn contains(&self, fact: &Fact) -> bool {
        self.by_predicate
            .get(&fact.predicate)
            .is_some_and(|set| set.contains(fact))
    }

    /// The facts of `facts` that are not stored yet, without duplicates, in
    /// input order.
    pub fn fresh(&self, facts: impl IntoIterator<Item = Fact>) -> Vec<Fact> {
        let mut seen = BTreeSet::new();
        facts
            .into_iter()
            .filter(|f| !self.contains(f) && seen.insert(f.clone()))
            .collect()
    }

    /// Stored facts of one predicate, in sorted order.
    pub fn by_predicate<'a>(&'a self, predicate: &str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.by_predicate
            .get(predicate)
            .into_iter()
            .flat_map(|set| set.iter())
    }

    /// Number of stored facts of one predicate.
    pub fn count_for(&self, predicate: &str) -> usize {
        self.by_predicate.get(predicate).map_or(0, BTreeSet::len)
    }

    /// All stored facts, sorted by predicate then arguments.
    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.by_predicate.values().flat_map(|set| set.iter())
    }

    /// Predicates that have at least one stored fact.
    pub fn predicates(&self) -> impl Iterator<Item = &str> {
        self.by_predicate.keys().map(String::as_str)
    }

    /// Remove every fact of a predicate. Returns how many were removed.
    pub fn retract_predicate(&mut self, predicate: &str) -> usize {
        match self.by_predicate.remove(predicate) {
            Some(set) => {
                self.len -= set.len();
                self.bytes -= set.iter().map(Fact::estimated_bytes).sum::<usize>();
                set.len()
            }
            None => 0,
        }
    }

    /// Remove every fact.
    pub fn clear(&mut self) {
        self.by_predicate.clear();
        self.len = 0;
        self.bytes = 0;
    }

    /// Number of stored facts.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory held by stored facts.
    pub fn estimated_bytes(&self) -> usize {
        self.bytes
    }
}
