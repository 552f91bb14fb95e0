//! Provenance tags: where a fact came from.
//!
//! Provenance is carried alongside every fact but never takes part in fact
//! identity. A fact loaded by the session and the same fact derived by a rule
//! are one fact.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::program::Layer;

/// How a fact entered the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Stated in the schema or policy layer text.
    Builtin,
    /// Loaded at runtime through `load_facts`.
    Session,
    /// Stated by a rule accepted into the learned layer.
    Learned,
    /// Produced by applying a rule during evaluation.
    Derived,
}

impl Provenance {
    /// Provenance of a bodyless clause stated in the given layer.
    pub fn for_layer(layer: Layer) -> Self {
        match layer {
            Layer::Schema | Layer::Policy => Self::Builtin,
            Layer::Learned => Self::Learned,
            Layer::Session => Self::Session,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Builtin => "builtin",
            Self::Session => "session",
            Self::Learned => "learned",
            Self::Derived => "derived",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_mapping() {
        assert_eq!(Provenance::for_layer(Layer::Schema), Provenance::Builtin);
        assert_eq!(Provenance::for_layer(Layer::Policy), Provenance::Builtin);
        assert_eq!(Provenance::for_layer(Layer::Learned), Provenance::Learned);
    }
}
