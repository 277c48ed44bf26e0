//! Python distributions: wheels and eggs (zip) and source distributions
//! (`.tar.gz`).
//!
//! Entries are read in one pass. `__init__.py` markers are collected first
//! so that every module's package can be rebuilt from its entry path, then
//! each `.py` entry is parsed. Nested distributions are written to the work
//! area and analyzed as children.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;

use crate::analyzer::{ArchiveAnalyzer, ArchiveContents, ArchiveKind, CancelToken, Memo};
use crate::catalog::{EntryKind, classify};
use crate::config::AnalysisConfig;
use crate::construct::ConstructMap;
use crate::digest::digest_file;
use crate::error::AnalysisError;
use crate::jar::keep_or_log;
use crate::library::{LibraryId, parse_python_metadata};
use crate::probe::{Extraction, MappedArchive, entry_path, read_entry};
use crate::python::{ModuleLocation, analyze_python_source};

const ZIP_SUFFIXES: &[&str] = &[".whl", ".egg"];
const TAR_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".gz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Zip,
    TarGz,
}

fn format_of(name: &str) -> Option<Format> {
    let name = name.to_lowercase();
    if ZIP_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Some(Format::Zip)
    } else if TAR_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Some(Format::TarGz)
    } else {
        None
    }
}

/// Whether a file name denotes a Python distribution this module reads.
pub fn is_python_archive(name: &str) -> bool {
    format_of(name).is_some()
}

struct Member {
    name: String,
    data: Vec<u8>,
}

fn wanted(name: &str) -> bool {
    match classify(name) {
        EntryKind::PythonSource | EntryKind::PythonMetadata => true,
        EntryKind::NestedArchive => is_python_archive(name),
        _ => false,
    }
}

#[derive(Debug)]
pub struct PythonArchiveAnalyzer {
    path: PathBuf,
    parent: Option<PathBuf>,
    config: Arc<AnalysisConfig>,
    digest: Memo<String>,
    scratch: Memo<Extraction>,
    contents: Memo<ArchiveContents>,
}

impl PythonArchiveAnalyzer {
    pub fn new(path: impl Into<PathBuf>, config: Arc<AnalysisConfig>) -> Self {
        Self {
            path: path.into(),
            parent: None,
            config,
            digest: Memo::default(),
            scratch: Memo::default(),
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
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let members = match format_of(&file_name) {
            Some(Format::Zip) => self.read_zip(cancel)?,
            Some(Format::TarGz) => self.read_tar_gz(cancel)?,
            None => {
                return Err(AnalysisError::UnsupportedFile {
                    path: self.path.clone(),
                    expected: "whl, egg or tar.gz",
                });
            }
        };

        let inits: BTreeSet<String> = members
            .iter()
            .filter(|m| m.name == "__init__.py" || m.name.ends_with("/__init__.py"))
            .map(|m| m.name.clone())
            .collect();

        let mut contents = ArchiveContents::default();
        for (index, member) in members.iter().enumerate() {
            cancel.check(&self.path)?;
            match classify(&member.name) {
                EntryKind::PythonSource => {
                    let location = ModuleLocation::in_archive(&member.name, &inits);
                    let source = String::from_utf8_lossy(&member.data);
                    keep_or_log(
                        &mut contents,
                        analyze_python_source(&source, &location, &entry_path(&self.path, &member.name)),
                    );
                }
                EntryKind::PythonMetadata => {
                    match parse_python_metadata(&String::from_utf8_lossy(&member.data)) {
                        Some(library) => {
                            contents.bundled.insert(library);
                        }
                        None => tracing::debug!(entry = %member.name, "metadata without name or version"),
                    }
                }
                EntryKind::NestedArchive => {
                    if let Some(child) = self.analyze_nested(index, member, cancel)? {
                        contents.children.push(child);
                    }
                }
                _ => {}
            }
        }

        tracing::info!(
            archive = %self.path.display(),
            modules = inits.len(),
            constructs = contents.constructs.len(),
            children = contents.children.len(),
            "python archive analyzed"
        );
        Ok(contents)
    }

    fn read_zip(&self, cancel: &CancelToken) -> Result<Vec<Member>, AnalysisError> {
        let mapped = MappedArchive::open(&self.path)?;
        let mut zip = mapped.zip()?;
        let mut members = Vec::new();
        for i in 0..zip.len() {
            cancel.check(&self.path)?;
            let mut entry = zip
                .by_index(i)
                .map_err(|e| AnalysisError::archive(&self.path, e))?;
            let name = entry.name().to_string();
            if entry.is_dir() || !wanted(&name) {
                continue;
            }
            let data = read_entry(&mut entry, &self.path)?;
            members.push(Member { name, data });
        }
        Ok(members)
    }

    fn read_tar_gz(&self, cancel: &CancelToken) -> Result<Vec<Member>, AnalysisError> {
        let io_err = |e| AnalysisError::io(&self.path, e);
        let file = File::open(&self.path).map_err(io_err)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut members = Vec::new();
        for entry in archive.entries().map_err(io_err)? {
            cancel.check(&self.path)?;
            let mut entry = entry.map_err(io_err)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let raw = entry.path().map_err(io_err)?.to_string_lossy().replace('\\', "/");
            let name = raw.trim_start_matches("./").to_string();
            if !wanted(&name) {
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(io_err)?;
            members.push(Member { name, data });
        }
        Ok(members)
    }

    /// Writes a nested distribution to the work area and analyzes it. A child
    /// that fails for a reason other than cancellation is logged and dropped.
    fn analyze_nested(
        &self,
        index: usize,
        member: &Member,
        cancel: &CancelToken,
    ) -> Result<Option<Arc<dyn ArchiveAnalyzer>>, AnalysisError> {
        let scratch = self
            .scratch
            .get_or_try_init(|| Extraction::prepare(&self.config, &self.path, self.digest()?))?;
        let file_name = member.name.rsplit('/').next().unwrap_or(&member.name);
        let dir = scratch.root().join(index.to_string());
        fs::create_dir_all(&dir).map_err(|e| AnalysisError::io(&dir, e))?;
        let target = dir.join(file_name);
        fs::write(&target, &member.data).map_err(|e| AnalysisError::io(&target, e))?;

        let child = PythonArchiveAnalyzer::new(&target, Arc::clone(&self.config))
            .with_parent(Some(&self.path));
        match child.analyze(cancel).and_then(|()| child.digest().map(|_| ())) {
            Ok(()) => Ok(Some(Arc::new(child))),
            Err(e) if e.is_canceled() => Err(e),
            Err(e) => {
                tracing::warn!(
                    archive = %self.path.display(),
                    entry = %member.name,
                    error = %e,
                    "skipping nested archive"
                );
                Ok(None)
            }
        }
    }
}

impl ArchiveAnalyzer for PythonArchiveAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> ArchiveKind {
        ArchiveKind::PythonArchive
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

    fn children(&self) -> Vec<Arc<dyn ArchiveAnalyzer>> {
        self.contents
            .get()
            .map(|c| c.children.clone())
            .unwrap_or_default()
    }

    fn library_id(&self) -> Option<&LibraryId> {
        self.config.known_library(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        for (name, content) in entries {
            zip.start_file(*name, FileOptions::default())?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn write_sdist(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let encoder = GzEncoder::new(File::create(path)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    fn qnames(analyzer: &PythonArchiveAnalyzer) -> anyhow::Result<Vec<String>> {
        Ok(analyzer.constructs()?.keys().map(|id| id.qualified_name()).collect())
    }

    #[test]
    fn wheel_rebuilds_packages_from_init_markers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let wheel = dir.path().join("demo-1.0-py3-none-any.whl");
        write_zip(
            &wheel,
            &[
                ("demo/core.py", b"def greet(name):\n    return name\n"),
                ("demo/__init__.py", b""),
                ("demo/sub/__init__.py", b""),
                ("demo/sub/tool.py", b"class Tool(object):\n    def __init__(self):\n        pass\n"),
                ("scripts/run.py", b"def main():\n    pass\n"),
                ("demo-1.0.dist-info/METADATA", b"Metadata-Version: 2.1\nName: demo\nVersion: 1.0\n"),
            ],
        )?;

        let analyzer = PythonArchiveAnalyzer::new(&wheel, Arc::new(AnalysisConfig::default()));
        analyzer.analyze(&CancelToken::new())?;
        let names = qnames(&analyzer)?;

        assert!(names.contains(&"demo.core.greet(name)".to_string()));
        assert!(names.contains(&"demo.sub.tool.Tool(object).__init__(self)".to_string()));
        assert!(names.contains(&"run.main()".to_string()));
        assert_eq!(
            analyzer.bundled_libraries()?.iter().cloned().collect::<Vec<_>>(),
            vec![LibraryId::pypi("demo", "1.0")]
        );
        Ok(())
    }

    #[test]
    fn sdist_with_nested_wheel_becomes_parent_and_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let inner = dir.path().join("inner-0.1-py3-none-any.whl");
        write_zip(&inner, &[("inner/__init__.py", b"def hello():\n    pass\n")])?;
        let inner_bytes = fs::read(&inner)?;

        let sdist = dir.path().join("outer-2.0.tar.gz");
        write_sdist(
            &sdist,
            &[
                ("outer-2.0/PKG-INFO", b"Name: outer\nVersion: 2.0\n"),
                ("outer-2.0/outer/__init__.py", b""),
                ("outer-2.0/outer/api.py", b"async def fetch(url):\n    pass\n"),
                ("outer-2.0/vendor/inner-0.1-py3-none-any.whl", inner_bytes.as_slice()),
            ],
        )?;

        let analyzer = PythonArchiveAnalyzer::new(&sdist, Arc::new(AnalysisConfig::default()));
        analyzer.analyze(&CancelToken::new())?;

        assert!(qnames(&analyzer)?.contains(&"outer.api.fetch(url)".to_string()));
        assert!(analyzer.bundled_libraries()?.contains(&LibraryId::pypi("outer", "2.0")));

        let children = analyzer.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].parent(), Some(sdist.as_path()));
        assert!(children[0]
            .constructs()?
            .keys()
            .any(|id| id.qualified_name() == "inner.__init__.hello()"));
        Ok(())
    }

    #[test]
    fn unparseable_module_is_skipped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let wheel = dir.path().join("bad-1.0.whl");
        write_zip(
            &wheel,
            &[("ok.py", b"def fine():\n    pass\n"), ("broken.py", b"def (:\n")],
        )?;
        let analyzer = PythonArchiveAnalyzer::new(&wheel, Arc::new(AnalysisConfig::default()));
        analyzer.analyze(&CancelToken::new())?;
        let names = qnames(&analyzer)?;
        assert!(names.contains(&"ok.fine()".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("broken")));
        Ok(())
    }

    #[test]
    fn archive_formats_by_name() {
        assert!(is_python_archive("x-1.0-py3-none-any.whl"));
        assert!(is_python_archive("x-1.0-py2.7.egg"));
        assert!(is_python_archive("x-1.0.tar.gz"));
        assert!(!is_python_archive("x-1.0.jar"));
    }

    #[test]
    fn every_python_archive_suffix_is_a_nested_entry() {
        for suffix in ZIP_SUFFIXES.iter().chain(TAR_SUFFIXES) {
            let entry = format!("deps/inner-1.0{suffix}");
            assert_eq!(classify(&entry), EntryKind::NestedArchive, "{entry}");
            assert!(wanted(&entry), "{entry}");
        }
    }
}
