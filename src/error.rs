//! Typed errors for each layer of the analysis.
//!
//! `IdError` and the `UnsupportedFile` variant of `AnalysisError` are usage
//! errors. `ResolveError` never escapes a file analysis on its own: it is
//! wrapped into `AnalysisError::Resolver` together with the file path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::construct::ConstructKind;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("package '{0}' cannot have a definition context")]
    PackageWithContext(String),

    #[error("unknown construct kind tag '{0}'")]
    UnknownKindTag(String),

    #[error("kind {kind:?} is not valid for {lang}")]
    KindNotSupported {
        lang: &'static str,
        kind: ConstructKind,
    },

    #[error("{kind:?} '{name}' requires a definition context of another kind")]
    InvalidContext { kind: ConstructKind, name: String },

    #[error("malformed qualified name '{qname}': {reason}")]
    Malformed { qname: String, reason: &'static str },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("expected {expected} on top of the context stack, found {found}")]
    UnexpectedContext {
        expected: &'static str,
        found: String,
    },

    #[error("no enclosing class, interface or enum for {0}")]
    NoEnclosingType(String),

    #[error("context stack underflow on exit of {0}")]
    StackUnderflow(&'static str),

    #[error("second package declaration '{0}'")]
    DuplicatePackage(String),

    #[error(transparent)]
    Id(#[from] IdError),
}

#[derive(Debug, Error)]
pub enum ClassFormatError {
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("unexpected end of class file at offset {0}")]
    Truncated(usize),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("constant pool index {0} does not point to the expected entry")]
    BadConstantIndex(u16),

    #[error("invalid descriptor '{0}'")]
    BadDescriptor(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("[{}] is not a {expected} file", path.display())]
    UnsupportedFile {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("I/O error on [{}]", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read archive [{}]", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("grammar rejected [{}]: {message}", path.display())]
    Grammar { path: PathBuf, message: String },

    #[error("malformed class file [{}]", path.display())]
    ClassFormat {
        path: PathBuf,
        #[source]
        source: ClassFormatError,
    },

    #[error("declaration nesting violated in [{}]", path.display())]
    Resolver {
        path: PathBuf,
        #[source]
        source: ResolveError,
    },

    #[error("analysis of [{}] was canceled", path.display())]
    Canceled { path: PathBuf },

    #[error("nested archives of [{}] could not be analyzed", path.display())]
    Nested {
        path: PathBuf,
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl AnalysisError {
    pub fn path(&self) -> &Path {
        match self {
            AnalysisError::UnsupportedFile { path, .. }
            | AnalysisError::Io { path, .. }
            | AnalysisError::Archive { path, .. }
            | AnalysisError::Grammar { path, .. }
            | AnalysisError::ClassFormat { path, .. }
            | AnalysisError::Resolver { path, .. }
            | AnalysisError::Canceled { path }
            | AnalysisError::Nested { path, .. } => path,
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn archive(path: &Path, source: zip::result::ZipError) -> Self {
        AnalysisError::Archive {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn resolver(path: &Path, source: ResolveError) -> Self {
        AnalysisError::Resolver {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn grammar(path: &Path, message: impl Into<String>) -> Self {
        AnalysisError::Grammar {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, AnalysisError::Canceled { .. })
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("analysis did not finish within {timeout:?}, {canceled} task(s) canceled")]
    Timeout { timeout: Duration, canceled: usize },

    #[error("cannot build worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("classpath entry [{}] does not exist", .0.display())]
    MissingPath(PathBuf),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}
