//! Session fact storage.
//!
//! Two tiers serve the extensional facts:
//!
//! - [`FactStore`]: the authoritative in-memory set every evaluation reads
//! - [`FactMirror`]: an optional redb copy that survives restarts
//!
//! [`SessionStore`] composes them: writes land in memory first and are then
//! mirrored; at open the mirror is read back into memory.

pub mod durable;
pub mod mem;

use std::path::Path;

use crate::error::StoreError;
use crate::fact::Fact;

pub use durable::FactMirror;
pub use mem::FactStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// In-memory facts with an optional durable mirror.
#[derive(Debug, Default)]
pub struct SessionStore {
    pub facts: FactStore,
    pub mirror: Option<FactMirror>,
}

impl SessionStore {
    /// Create a memory-only store (no persistence).
    pub fn memory_only() -> Self {
        Self::default()
    }

    /// Open a mirrored store, reloading the facts the mirror already holds.
    ///
    /// Each reloaded fact must pass `check`; facts that fail are dropped
    /// from the mirror with a warning.
    pub fn with_mirror<F>(path: &Path, check: F) -> StoreResult<Self>
    where
        F: Fn(&Fact) -> Result<(), String>,
    {
        let mirror = FactMirror::open(path)?;
        let mut facts = FactStore::new();
        let mut refused = Vec::new();
        for fact in mirror.load_all()? {
            match check(&fact) {
                Ok(()) => {
                    facts.insert(fact);
                }
                Err(reason) => {
                    tracing::warn!(%fact, %reason, "dropping mirrored fact");
                    refused.push(fact);
                }
            }
        }
        mirror.remove_all(&refused)?;
        tracing::debug!(
            path = %path.display(),
            facts = facts.len(),
            dropped = refused.len(),
            "reloaded session mirror"
        );
        Ok(Self {
            facts,
            mirror: Some(mirror),
        })
    }

    /// Store facts that are known to be fresh. Returns how many were stored.
    ///
    /// The mirror is written before memory so a failed mirror write leaves
    /// both tiers unchanged.
    pub fn insert_fresh(&mut self, fresh: Vec<Fact>) -> StoreResult<usize> {
        if let Some(mirror) = &self.mirror {
            mirror.insert_all(&fresh)?;
        }
        Ok(fresh
            .into_iter()
            .map(|fact| self.facts.insert(fact))
            .filter(|inserted| *inserted)
            .count())
    }

    /// Remove every fact of a predicate from both tiers.
    pub fn retract_predicate(&mut self, predicate: &str) -> StoreResult<usize> {
        if let Some(mirror) = &self.mirror {
            mirror.retract_predicate(predicate)?;
        }
        Ok(self.facts.retract_predicate(predicate))
    }

    /// Remove every fact from both tiers.
    pub fn clear(&mut self) -> StoreResult<()> {
        if let Some(mirror) = &self.mirror {
            mirror.clear()?;
        }
        self.facts.clear();
        Ok(())
    }

    /// Whether facts survive a restart.
    pub fn is_persistent(&self) -> bool {
        self.mirror.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Value;
    use tempfile::TempDir;

    fn fact(n: i64) -> Fact {
        Fact::new("seen", vec![Value::Int(n)])
    }

    fn accept_all(_: &Fact) -> Result<(), String> {
        Ok(())
    }

    #[test]
    fn memory_only_store() {
        let mut store = SessionStore::memory_only();
        assert!(!store.is_persistent());
        assert_eq!(store.insert_fresh(vec![fact(1), fact(2)]).unwrap(), 2);
        assert_eq!(store.retract_predicate("seen").unwrap(), 2);
        assert!(store.facts.is_empty());
    }

    #[test]
    fn mirrored_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.redb");
        {
            let mut store = SessionStore::with_mirror(&path, accept_all).unwrap();
            store.insert_fresh(vec![fact(1), fact(2), fact(3)]).unwrap();
        }
        let mut store = SessionStore::with_mirror(&path, accept_all).unwrap();
        assert_eq!(store.facts.len(), 3);

        store.clear().unwrap();
        drop(store);
        let store = SessionStore::with_mirror(&path, accept_all).unwrap();
        assert!(store.facts.is_empty());
    }

    #[test]
    fn reload_drops_facts_that_fail_the_check() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.redb");
        {
            let mut store = SessionStore::with_mirror(&path, accept_all).unwrap();
            store
                .insert_fresh(vec![fact(1), Fact::new("gone", vec![Value::Int(9)])])
                .unwrap();
        }
        let only_seen = |f: &Fact| {
            if f.predicate == "seen" {
                Ok(())
            } else {
                Err(format!("'{}' is not declared", f.predicate))
            }
        };
        let store = SessionStore::with_mirror(&path, only_seen).unwrap();
        assert_eq!(store.facts.iter().cloned().collect::<Vec<_>>(), vec![fact(1)]);
        drop(store);

        let store = SessionStore::with_mirror(&path, accept_all).unwrap();
        assert_eq!(store.facts.len(), 1);
    }
}
