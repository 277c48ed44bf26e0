//! Android archives. The AAR is unpacked and its `classes.jar` analyzed as
//! the payload; the payload is not a child and the AAR keeps its own digest.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::{ArchiveAnalyzer, ArchiveContents, ArchiveKind, CancelToken, Memo};
use crate::config::AnalysisConfig;
use crate::construct::ConstructMap;
use crate::digest::digest_file;
use crate::error::AnalysisError;
use crate::jar::JarAnalyzer;
use crate::library::LibraryId;
use crate::probe::{Extraction, extract_zip};

const PAYLOAD: &str = "classes.jar";

#[derive(Debug)]
pub struct AarAnalyzer {
    path: PathBuf,
    parent: Option<PathBuf>,
    config: Arc<AnalysisConfig>,
    digest: Memo<String>,
    contents: Memo<ArchiveContents>,
}

impl AarAnalyzer {
    pub fn new(path: impl Into<PathBuf>, config: Arc<AnalysisConfig>) -> Self {
        Self {
            path: path.into(),
            parent: None,
            config,
            digest: Memo::default(),
            contents: Memo::default(),
        }
    }

    pub fn with_parent(mut self, parent: Option<&Path>) -> Self {
        self.parent = parent.map(Path::to_path_buf);
        self
    }

    fn contents(&self, cancel: &CancelToken) -> Result<&ArchiveContents, AnalysisError> {
        self.contents.get_or_try_init(|| self.scan(cancel))
    }

    fn scan(&self, cancel: &CancelToken) -> Result<ArchiveContents, AnalysisError> {
        let extraction = Extraction::prepare(&self.config, &self.path, self.digest()?)?;
        extract_zip(&self.path, extraction.root(), cancel)?;

        let payload = extraction.root().join(PAYLOAD);
        if !payload.is_file() {
            tracing::info!(aar = %self.path.display(), "no classes.jar, nothing to analyze");
            return Ok(ArchiveContents::default());
        }

        let jar = JarAnalyzer::new(&payload, Arc::clone(&self.config));
        jar.analyze(cancel)?;
        tracing::debug!(
            aar = %self.path.display(),
            aar_digest = self.digest()?,
            payload_digest = jar.digest()?,
            "analyzed classes.jar payload"
        );
        Ok(ArchiveContents {
            constructs: jar.constructs()?.clone(),
            bundled: jar.bundled_libraries()?.clone(),
            children: Vec::new(),
        })
    }
}

impl ArchiveAnalyzer for AarAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Aar
    }

    fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    fn analyze(&self, cancel: &CancelToken) -> Result<(), AnalysisError> {
        self.contents(cancel).map(|_| ())
    }

    fn digest(&self) -> Result<&str, AnalysisError> {
        self.digest
            .get_or_try_init(|| digest_file(&self.path))
            .map(String::as_str)
    }

    fn constructs(&self) -> Result<&ConstructMap, AnalysisError> {
        Ok(&self.contents(&CancelToken::new())?.constructs)
    }

    fn bundled_libraries(&self) -> Result<&BTreeSet<LibraryId>, AnalysisError> {
        Ok(&self.contents(&CancelToken::new())?.bundled)
    }

    fn library_id(&self) -> Option<&LibraryId> {
        self.config.known_library(&self.path)
    }
}
