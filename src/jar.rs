//! Plain JAR analysis: every class file and Java source file packaged in the
//! archive contributes its constructs; Maven descriptors name the bundled
//! libraries. Nested archives inside a plain JAR are not descended into.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::{ArchiveAnalyzer, ArchiveContents, ArchiveKind, CancelToken, Memo};
use crate::catalog::{EntryKind, class_name_from_entry, classify, is_descriptor_class};
use crate::classfile::analyze_class_bytes;
use crate::config::AnalysisConfig;
use crate::construct::ConstructMap;
use crate::digest::digest_file;
use crate::error::AnalysisError;
use crate::java_source::analyze_java_source;
use crate::library::{LibraryId, parse_maven_descriptor};
use crate::probe::{MappedArchive, entry_path, read_entry};

#[derive(Debug)]
pub struct JarAnalyzer {
    path: PathBuf,
    parent: Option<PathBuf>,
    config: Arc<AnalysisConfig>,
    digest: Memo<String>,
    contents: Memo<ArchiveContents>,
}

impl JarAnalyzer {
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
        let mapped = MappedArchive::open(&self.path)?;
        let mut zip = mapped.zip()?;
        let mut contents = ArchiveContents::default();
        let mut nested = 0usize;

        for i in 0..zip.len() {
            cancel.check(&self.path)?;
            let mut entry = zip
                .by_index(i)
                .map_err(|e| AnalysisError::archive(&self.path, e))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            match classify(&name) {
                EntryKind::Class => {
                    let bytes = read_entry(&mut entry, &self.path)?;
                    add_class(&mut contents, &entry_path(&self.path, &name), &name, &bytes);
                }
                EntryKind::JavaSource => {
                    let bytes = read_entry(&mut entry, &self.path)?;
                    let source = String::from_utf8_lossy(&bytes);
                    keep_or_log(
                        &mut contents,
                        analyze_java_source(&source, &entry_path(&self.path, &name)),
                    );
                }
                EntryKind::MavenDescriptor => {
                    let bytes = read_entry(&mut entry, &self.path)?;
                    add_maven_descriptor(&mut contents.bundled, &name, &bytes);
                }
                EntryKind::NestedArchive => nested += 1,
                _ => {}
            }
        }

        if nested > 0 {
            tracing::debug!(
                jar = %self.path.display(),
                nested,
                "nested archives in a plain jar are not analyzed"
            );
        }
        tracing::info!(
            jar = %self.path.display(),
            constructs = contents.constructs.len(),
            bundled = contents.bundled.len(),
            "jar analyzed"
        );
        Ok(contents)
    }
}

impl ArchiveAnalyzer for JarAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Jar
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

/// Analyzes one class file found at `location`, named `entry` relative to
/// its class root. A malformed class is logged and skipped so a single bad
/// entry does not fail the archive.
pub(crate) fn add_class(contents: &mut ArchiveContents, location: &Path, entry: &str, bytes: &[u8]) {
    if is_descriptor_class(entry) {
        return;
    }
    if class_name_from_entry(entry).is_none() {
        tracing::warn!(
            path = %location.display(),
            "skipping class entry that is not a valid class name"
        );
        return;
    }
    keep_or_log(contents, analyze_class_bytes(bytes, location));
}

pub(crate) fn add_maven_descriptor(bundled: &mut BTreeSet<LibraryId>, entry: &str, bytes: &[u8]) {
    match parse_maven_descriptor(entry, bytes) {
        Some(library) => {
            bundled.insert(library);
        }
        None => tracing::debug!(entry, "maven descriptor without coordinates"),
    }
}

pub(crate) fn keep_or_log(contents: &mut ArchiveContents, result: Result<ConstructMap, AnalysisError>) {
    match result {
        Ok(constructs) => contents.merge(constructs),
        Err(e) => tracing::warn!(path = %e.path().display(), error = %e, "skipping unparseable entry"),
    }
}
