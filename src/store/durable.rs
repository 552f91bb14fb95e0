//! ACID-durable session fact mirror backed by redb.
//!
//! Every fact accepted into the session is mirrored here so a restarted
//! kernel comes back with the same extensional facts. Keys are the predicate
//! name, a NUL separator, then the bincode-encoded arguments, so all facts of
//! one predicate form a contiguous key range.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use crate::error::StoreError;
use crate::fact::{Fact, Value};
use crate::store::StoreResult;

/// Table of mirrored facts (fact key → bincode `Fact`).
const FACTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("facts");

/// Durable copy of the session facts.
///
/// All writes go through transactions. Reads use MVCC snapshots.
pub struct FactMirror {
    db: Database,
    path: PathBuf,
}

impl FactMirror {
    /// Open or create the mirror database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io { source: e })?;
        }
        let db = Database::create(path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", path.display()),
        })?;

        // Create the table up front so read transactions never miss it.
        let txn = db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mirror a batch of facts in one transaction.
    pub fn insert_all(&self, facts: &[Fact]) -> StoreResult<()> {
        if facts.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            for fact in facts {
                let key = fact_key(&fact.predicate, &fact.args)?;
                let value = bincode::serialize(fact).map_err(|e| StoreError::Serialization {
                    message: format!("failed to encode fact {fact}: {e}"),
                })?;
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(|e| StoreError::Redb {
                        message: format!("insert failed: {e}"),
                    })?;
            }
        }
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Remove specific facts in one transaction.
    pub fn remove_all(&self, facts: &[Fact]) -> StoreResult<()> {
        if facts.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            for fact in facts {
                let key = fact_key(&fact.predicate, &fact.args)?;
                table.remove(key.as_slice()).map_err(|e| StoreError::Redb {
                    message: format!("remove failed: {e}"),
                })?;
            }
        }
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Remove every mirrored fact of one predicate. Returns how many were removed.
    pub fn retract_predicate(&self, predicate: &str) -> StoreResult<usize> {
        let prefix = predicate_prefix(predicate);
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        let removed = {
            let mut table = txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            let mut keys = Vec::new();
            let range = table
                .range(prefix.as_slice()..)
                .map_err(|e| StoreError::Redb {
                    message: format!("range failed: {e}"),
                })?;
            for entry in range {
                let (key, _) = entry.map_err(|e| StoreError::Redb {
                    message: format!("range read failed: {e}"),
                })?;
                if !key.value().starts_with(&prefix) {
                    break;
                }
                keys.push(key.value().to_vec());
            }
            for key in &keys {
                table.remove(key.as_slice()).map_err(|e| StoreError::Redb {
                    message: format!("remove failed: {e}"),
                })?;
            }
            keys.len()
        };
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(removed)
    }

    /// Remove every mirrored fact.
    pub fn clear(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        txn.delete_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
            message: format!("delete_table failed: {e}"),
        })?;
        txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        txn.commit().map_err(|e| StoreError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Read back every mirrored fact, in key order.
    pub fn load_all(&self) -> StoreResult<Vec<Fact>> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        let iter = table.iter().map_err(|e| StoreError::Redb {
            message: format!("iter failed: {e}"),
        })?;

        let mut facts = Vec::new();
        for entry in iter {
            let (_, value) = entry.map_err(|e| StoreError::Redb {
                message: format!("iter read failed: {e}"),
            })?;
            let fact: Fact =
                bincode::deserialize(value.value()).map_err(|e| StoreError::Serialization {
                    message: format!("failed to decode mirrored fact: {e}"),
                })?;
            facts.push(fact);
        }
        Ok(facts)
    }

    /// Number of mirrored facts.
    pub fn len(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn.open_table(FACTS_TABLE).map_err(|e| StoreError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        table.len().map_err(|e| StoreError::Redb {
            message: format!("len failed: {e}"),
        })
    }

    /// Whether the mirror holds no facts.
    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }
}

impl std::fmt::Debug for FactMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactMirror")
            .field("path", &self.path)
            .finish()
    }
}

fn predicate_prefix(predicate: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(predicate.len() + 1);
    prefix.extend_from_slice(predicate.as_bytes());
    prefix.push(0);
    prefix
}

fn fact_key(predicate: &str, args: &[Value]) -> StoreResult<Vec<u8>> {
    let mut key = predicate_prefix(predicate);
    let encoded = bincode::serialize(args).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode arguments of '{predicate}': {e}"),
    })?;
    key.extend_from_slice(&encoded);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::Provenance;
    use tempfile::TempDir;

    fn fact(p: &str, n: i64) -> Fact {
        Fact::new(p, vec![Value::Int(n)])
    }

    #[test]
    fn insert_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.redb");

        {
            let mirror = FactMirror::open(&path).unwrap();
            mirror
                .insert_all(&[fact("budget", 5), fact("budget", 5), fact("depth", 2)])
                .unwrap();
            assert_eq!(mirror.len().unwrap(), 2);
        }

        let mirror = FactMirror::open(&path).unwrap();
        let facts = mirror.load_all().unwrap();
        assert_eq!(facts, vec![fact("budget", 5), fact("depth", 2)]);
        assert_eq!(facts[0].provenance, Provenance::Session);
    }

    #[test]
    fn retract_only_touches_one_predicate() {
        let dir = TempDir::new().unwrap();
        let mirror = FactMirror::open(&dir.path().join("m.redb")).unwrap();
        mirror
            .insert_all(&[fact("a", 1), fact("a", 2), fact("ab", 3), fact("b", 4)])
            .unwrap();

        assert_eq!(mirror.retract_predicate("a").unwrap(), 2);
        let left: Vec<String> = mirror
            .load_all()
            .unwrap()
            .into_iter()
            .map(|f| f.predicate)
            .collect();
        assert_eq!(left, ["ab", "b"]);
        assert_eq!(mirror.retract_predicate("missing").unwrap(), 0);
    }

    #[test]
    fn remove_all_drops_named_facts() {
        let dir = TempDir::new().unwrap();
        let mirror = FactMirror::open(&dir.path().join("m.redb")).unwrap();
        let keep = Fact::new("a", vec![Value::Int(1)]);
        let gone = Fact::new("a", vec![Value::Int(2)]);
        mirror.insert_all(&[keep.clone(), gone.clone()]).unwrap();
        mirror.remove_all(&[gone]).unwrap();
        assert_eq!(mirror.load_all().unwrap(), vec![keep]);
    }

    #[test]
    fn clear_empties_and_stays_usable() {
        let dir = TempDir::new().unwrap();
        let mirror = FactMirror::open(&dir.path().join("m.redb")).unwrap();
        mirror.insert_all(&[fact("a", 1)]).unwrap();
        mirror.clear().unwrap();
        assert!(mirror.is_empty().unwrap());
        mirror.insert_all(&[fact("a", 2)]).unwrap();
        assert_eq!(mirror.len().unwrap(), 1);
    }
}
