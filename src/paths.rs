//! On-disk layout of a kernel root.
//!
//! A kernel root holds the three rule layers, the session fact mirror, and an
//! optional config file:
//!
//! ```text
//! <root>/schema.mg
//! <root>/policy.mg
//! <root>/learned.mg      (append-only)
//! <root>/session.redb
//! <root>/kernel.toml
//! ```
//!
//! The default root follows the XDG Base Directory Specification.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::program::{Layer, Sources};

/// Errors from path resolution and layer file access.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(akh::paths::no_home),
        help("Set the HOME environment variable or pass an explicit kernel root.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(akh::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read layer file: {path}")]
    #[diagnostic(
        code(akh::paths::read_layer),
        help("Check that the file is readable. Missing layer files are treated as empty.")
    )]
    ReadLayer {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// File locations under one kernel root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPaths {
    pub root: PathBuf,
    pub schema: PathBuf,
    pub policy: PathBuf,
    pub learned: PathBuf,
    pub session_db: PathBuf,
    pub config_file: PathBuf,
}

impl KernelPaths {
    /// Layout rooted at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            schema: root.join("schema.mg"),
            policy: root.join("policy.mg"),
            learned: root.join("learned.mg"),
            session_db: root.join("session.redb"),
            config_file: root.join("kernel.toml"),
            root,
        }
    }

    /// Default root: `$XDG_DATA_HOME/akh-kernel/` (falls back to
    /// `~/.local/share/akh-kernel/`).
    pub fn resolve() -> PathResult<Self> {
        let data_dir = match std::env::var("XDG_DATA_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".local/share"))
                .map_err(|_| PathError::NoHome)?,
        };
        Ok(Self::at(data_dir.join("akh-kernel")))
    }

    /// Create the root directory. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| PathError::CreateDir {
            path: self.root.display().to_string(),
            source: e,
        })
    }

    /// File holding a program layer. `Session` has none.
    pub fn layer_file(&self, layer: Layer) -> Option<&Path> {
        match layer {
            Layer::Schema => Some(&self.schema),
            Layer::Policy => Some(&self.policy),
            Layer::Learned => Some(&self.learned),
            Layer::Session => None,
        }
    }

    /// Whether `path` is one of the rule layer files.
    pub fn is_layer_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        [&self.schema, &self.policy, &self.learned]
            .iter()
            .any(|p| p.file_name() == Some(name))
    }

    /// Read all three layers. Missing files read as empty.
    pub fn read_sources(&self) -> PathResult<Sources> {
        Ok(Sources {
            schema: read_layer(&self.schema)?,
            policy: read_layer(&self.policy)?,
            learned: read_layer(&self.learned)?,
        })
    }
}

fn read_layer(path: &Path) -> PathResult<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(PathError::ReadLayer {
            path: path.display().to_string(),
            source: e,
        }),
    }
}
