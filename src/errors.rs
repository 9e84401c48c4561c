//! Structured error types for the rewrite pipeline.
//!
//! The pipeline uses `anyhow::Result` at call sites for context chaining,
//! while this enum gives every failure a stable category that user-facing
//! messages and tests can match on. Transformation-stage invariant
//! violations are fatal; only the materializer aggregates errors before
//! surfacing one.

use std::fmt;
use std::path::PathBuf;

/// Categorised pipeline error.
///
/// Every variant names the subject (package, file, function) so the final
/// report can say where a stage failed, not just that it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    /// The loader could not produce a clean typed package graph.
    Load {
        message: String,
        path: Option<PathBuf>,
    },
    /// Entry packages span multiple cargo packages, or have none.
    InconsistentEntry { message: String },
    /// A requested extra package was not found in the loaded graph.
    MissingExtra { packages: Vec<String> },
    /// The edit buffer detected overlapping actions. Always a programmer
    /// error in the rewriter.
    OverlappingEdits { file: PathBuf, detail: String },
    /// A declaration violated a rewrite invariant.
    MalformedDecl { subject: String, message: String },
    /// Reading or editing a staged manifest failed.
    Manifest {
        message: String,
        path: Option<PathBuf>,
    },
    /// I/O failure while mirroring a source tree.
    Copy { path: PathBuf, message: String },
    /// I/O failure while writing rewritten or generated content.
    Write { path: PathBuf, message: String },
    /// Two generated stubs registered the same `(pkg, owner, func)`.
    DuplicateRegistration {
        pkg: String,
        owner: String,
        func: String,
    },
}

impl RewriteError {
    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
            path: None,
        }
    }

    pub fn load_with_path(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Load {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    pub fn inconsistent_entry(message: impl Into<String>) -> Self {
        Self::InconsistentEntry {
            message: message.into(),
        }
    }

    pub fn missing_extra(packages: Vec<String>) -> Self {
        Self::MissingExtra { packages }
    }

    pub fn overlapping_edits(file: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::OverlappingEdits {
            file: file.into(),
            detail: detail.into(),
        }
    }

    pub fn malformed(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDecl {
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn manifest(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Manifest {
            message: message.into(),
            path,
        }
    }

    pub fn copy(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Copy {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { message, path } => match path {
                Some(p) => write!(f, "load error in {}: {}", p.display(), message),
                None => write!(f, "load error: {}", message),
            },
            Self::InconsistentEntry { message } => {
                write!(f, "inconsistent entry packages: {}", message)
            }
            Self::MissingExtra { packages } => {
                write!(f, "packages not found: {}", packages.join(", "))
            }
            Self::OverlappingEdits { file, detail } => {
                write!(f, "overlapping edits in {}: {}", file.display(), detail)
            }
            Self::MalformedDecl { subject, message } => {
                write!(f, "malformed declaration {}: {}", subject, message)
            }
            Self::Manifest { message, path } => match path {
                Some(p) => write!(f, "manifest error in {}: {}", p.display(), message),
                None => write!(f, "manifest error: {}", message),
            },
            Self::Copy { path, message } => {
                write!(f, "copy error for {}: {}", path.display(), message)
            }
            Self::Write { path, message } => {
                write!(f, "write error for {}: {}", path.display(), message)
            }
            Self::DuplicateRegistration { pkg, owner, func } => write!(
                f,
                "duplicate mock stub registration: pkg={}, owner={}, func={}",
                pkg, owner, func
            ),
        }
    }
}

impl std::error::Error for RewriteError {}
