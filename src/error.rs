//! Pipeline error types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by `resolve`, `load` and `assemble`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("couldn't find file '{path}' with type '{accept}'\n{}", LoadPaths(.paths))]
    FileNotFound {
        path: String,
        accept: String,
        paths: Vec<PathBuf>,
    },

    #[error("no transformer from '{from}' to '{to}'")]
    Conversion { from: String, to: String },

    #[error(
        "multiple files with the same output path cannot be linked ('{logical_path}')\n\
         in '{}' these files were linked:\n  - {}\n  - {}",
        .parent.display(), .first.display(), .second.display()
    )]
    DoubleLink {
        parent: PathBuf,
        logical_path: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{} is '{actual}', not '{expected}'", .path.display())]
    ContentTypeMismatch {
        path: PathBuf,
        actual: String,
        expected: String,
    },

    #[error("{} is not inside any load path", .path.display())]
    OutsideLoadPaths { path: PathBuf },

    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("unknown pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("unknown helper '{0}'")]
    UnknownHelper(String),

    #[error("circular dependency: {0} is already being loaded")]
    Circular(String),

    #[error("{}:{line}: {message}", .path.display())]
    Directive {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("IO error when reading `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("cache serialization error")]
    Serde(#[from] serde_json::Error),

    // Processor failures pass through untouched
    #[error(transparent)]
    Processor(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error means the requested asset does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }
}

/// Formats the "checked in these paths" trailer of a not-found error.
struct LoadPaths<'a>(&'a [PathBuf]);

impl fmt::Display for LoadPaths<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checked in these paths:")?;
        for path in self.0 {
            write!(f, "\n  {}", path.display())?;
        }
        Ok(())
    }
}
