//! Analyzer traits shared by file and archive analyzers.
//!
//! File analyzers bind a path at construction and parse lazily: the first
//! query runs the parser and the result is kept for the analyzer's lifetime.
//! Archive analyzers are driven eagerly through [`ArchiveAnalyzer::analyze`]
//! by the orchestrator and answer later queries from the same memoized state.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::construct::{Construct, ConstructId, ConstructMap};
use crate::error::AnalysisError;
use crate::library::LibraryId;

/// Write-once cell that keeps the first successful result.
///
/// Failed initializations are not cached; the next caller retries.
#[derive(Debug)]
pub struct Memo<T> {
    cell: OnceLock<T>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T> Memo<T> {
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }
}

/// Cooperative cancellation flag shared between the orchestrator and a task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with `Canceled` for `path` once cancellation was requested.
    pub fn check(&self, path: &Path) -> Result<(), AnalysisError> {
        if self.is_canceled() {
            return Err(AnalysisError::Canceled {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Aggregated result of one archive analysis.
#[derive(Debug, Default)]
pub struct ArchiveContents {
    pub constructs: ConstructMap,
    pub bundled: BTreeSet<LibraryId>,
    pub children: Vec<Arc<dyn ArchiveAnalyzer>>,
}

impl ArchiveContents {
    /// Adds the constructs of one analyzed file; later ids replace earlier.
    pub fn merge(&mut self, constructs: ConstructMap) {
        self.constructs.extend(constructs);
    }
}

pub trait FileAnalyzer: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    /// Parses on first use; later calls return the memoized map.
    fn constructs(&self) -> Result<&ConstructMap, AnalysisError>;

    fn contains(&self, id: &ConstructId) -> Result<bool, AnalysisError> {
        Ok(self.constructs()?.contains_key(id))
    }

    fn get(&self, id: &ConstructId) -> Result<Option<&Construct>, AnalysisError> {
        Ok(self.constructs()?.get(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Jar,
    SelfContainedJar,
    War,
    Aar,
    PythonArchive,
}

pub trait ArchiveAnalyzer: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    fn kind(&self) -> ArchiveKind;

    /// Path of the archive this one was found in, if any.
    fn parent(&self) -> Option<&Path>;

    /// Runs the analysis, checking `cancel` between entries. Idempotent.
    fn analyze(&self, cancel: &CancelToken) -> Result<(), AnalysisError>;

    /// Digest over the packaged bytes of this archive.
    fn digest(&self) -> Result<&str, AnalysisError>;

    fn constructs(&self) -> Result<&ConstructMap, AnalysisError>;

    fn bundled_libraries(&self) -> Result<&BTreeSet<LibraryId>, AnalysisError>;

    /// Direct children. Empty until `analyze` completed.
    fn children(&self) -> Vec<Arc<dyn ArchiveAnalyzer>> {
        Vec::new()
    }

    /// Library identity supplied by the caller for this path.
    fn library_id(&self) -> Option<&LibraryId> {
        None
    }
}

/// The analyzer and every transitively nested child, depth first.
pub fn flatten(analyzer: &Arc<dyn ArchiveAnalyzer>) -> Vec<Arc<dyn ArchiveAnalyzer>> {
    let mut out = vec![Arc::clone(analyzer)];
    for child in analyzer.children() {
        out.extend(flatten(&child));
    }
    out
}

/// Picks the file analyzer for `path` by extension.
pub fn file_analyzer_for(path: &Path) -> Option<Box<dyn FileAnalyzer>> {
    let ext = path.extension()?.to_str()?;
    let path = path.to_path_buf();
    let analyzer: Box<dyn FileAnalyzer> = match ext {
        "java" => Box::new(crate::java_source::JavaSourceAnalyzer::bind(path).ok()?),
        "class" => Box::new(crate::classfile::ClassFileAnalyzer::bind(path).ok()?),
        "py" => Box::new(crate::python::PythonFileAnalyzer::bind(path).ok()?),
        _ => return None,
    };
    Some(analyzer)
}

/// Usage check shared by the file analyzers' `bind` constructors.
pub(crate) fn require_extension(
    path: PathBuf,
    ext: &'static str,
) -> Result<PathBuf, AnalysisError> {
    if path.extension().is_some_and(|e| e == ext) {
        Ok(path)
    } else {
        Err(AnalysisError::UnsupportedFile {
            path,
            expected: ext,
        })
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, AnalysisError> {
    std::fs::read(path).map_err(|e| AnalysisError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memo_keeps_first_success_and_retries_failures() {
        let memo: Memo<u32> = Memo::default();
        let failed: Result<&u32, &str> = memo.get_or_try_init(|| Err("boom"));
        assert!(failed.is_err());
        assert!(memo.get().is_none());

        assert_eq!(*memo.get_or_try_init::<()>(|| Ok(7)).unwrap(), 7);
        assert_eq!(*memo.get_or_try_init::<()>(|| Ok(9)).unwrap(), 7);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check(Path::new("a.jar")).is_ok());
        clone.cancel();
        let err = token.check(Path::new("a.jar")).unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(err.path(), Path::new("a.jar"));
    }

    #[test]
    fn file_analyzer_for_dispatches_on_extension() {
        assert!(file_analyzer_for(Path::new("A.java")).is_some());
        assert!(file_analyzer_for(Path::new("A.class")).is_some());
        assert!(file_analyzer_for(Path::new("a.py")).is_some());
        assert!(file_analyzer_for(Path::new("a.txt")).is_none());
        assert!(file_analyzer_for(Path::new("Makefile")).is_none());
    }

    #[test]
    fn require_extension_is_a_usage_error() {
        let err = require_extension(PathBuf::from("A.class"), "java").unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFile { expected: "java", .. }));
    }
}
