//! Ground facts and the values they carry.
//!
//! A [`Fact`] is a predicate applied to an ordered list of [`Value`]s. Facts
//! have set semantics: identity, equality, hashing and ordering only look at
//! `(predicate, args)`, never at provenance.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::provenance::Provenance;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A constant appearing in a fact or rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// A name constant such as `/reviewed`. Stored with its leading slash.
    Name(String),
    /// A string literal.
    Str(String),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float. Compared by total order so values stay hashable.
    Float(f64),
}

impl Value {
    /// Build a name constant, adding the leading `/` if missing.
    pub fn name(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.starts_with('/') {
            Self::Name(name.to_string())
        } else {
            Self::Name(format!("/{name}"))
        }
    }

    /// Build a string constant.
    pub fn string(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Short type label used in diagnostics.
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Name(_) => "/name",
            Self::Str(_) => "/string",
            Self::Int(_) => "/number",
            Self::Float(_) => "/float",
        }
    }

    /// Rough heap + inline footprint, used by the limits enforcer.
    pub fn estimated_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Self>();
        match self {
            Self::Name(s) | Self::Str(s) => inline + s.len(),
            Self::Int(_) | Self::Float(_) => inline,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Name(_) => 0,
            Self::Str(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Name(s) | Self::Str(s) => s.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(x) => x.to_bits().hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) | (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(n) => f.write_str(n),
            Self::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A ground fact with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    pub args: Vec<Value>,
    pub provenance: Provenance,
}

impl Fact {
    /// Create a session fact.
    pub fn new(predicate: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
            provenance: Provenance::Session,
        }
    }

    /// Replace the provenance tag.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Rough memory footprint of this fact.
    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.predicate.len()
            + self.args.iter().map(Value::estimated_bytes).sum::<usize>()
    }
}

impl PartialEq for Fact {
    fn eq(&self, other: &Self) -> bool {
        self.predicate == other.predicate && self.args == other.args
    }
}

impl Eq for Fact {}

impl Hash for Fact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.predicate.hash(state);
        self.args.hash(state);
    }
}

impl PartialOrd for Fact {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fact {
    fn cmp(&self, other: &Self) -> Ordering {
        self.predicate
            .cmp(&other.predicate)
            .then_with(|| self.args.cmp(&other.args))
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}
