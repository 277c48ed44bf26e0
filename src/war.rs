//! Exploded-archive analysis for WARs and self-contained JARs.
//!
//! Both layouts are extracted first. Class files below the classes
//! directory are analyzed in place; the archives below the library
//! directory are handed to a child [`Orchestrator`] whose completed
//! analyzers become this analyzer's children.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::{ArchiveAnalyzer, ArchiveContents, ArchiveKind, CancelToken, Memo};
use crate::config::AnalysisConfig;
use crate::construct::ConstructMap;
use crate::digest::digest_file;
use crate::error::AnalysisError;
use crate::jar::{add_class, add_maven_descriptor};
use crate::library::{LibraryId, is_maven_descriptor};
use crate::orchestrator::Orchestrator;
use crate::probe::{Extraction, extract_zip};
use crate::scan::{relative_entry_name, scan_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `WEB-INF/classes` and `WEB-INF/lib`.
    Web,
    /// `BOOT-INF/classes` and `BOOT-INF/lib`.
    SelfContained,
}

impl Layout {
    fn classes_dir(self) -> &'static str {
        match self {
            Layout::Web => "WEB-INF/classes",
            Layout::SelfContained => "BOOT-INF/classes",
        }
    }

    fn lib_dir(self) -> &'static str {
        match self {
            Layout::Web => "WEB-INF/lib",
            Layout::SelfContained => "BOOT-INF/lib",
        }
    }

    fn kind(self) -> ArchiveKind {
        match self {
            Layout::Web => ArchiveKind::War,
            Layout::SelfContained => ArchiveKind::SelfContainedJar,
        }
    }
}

#[derive(Debug)]
pub struct WarAnalyzer {
    path: PathBuf,
    parent: Option<PathBuf>,
    config: Arc<AnalysisConfig>,
    layout: Layout,
    digest: Memo<String>,
    extraction: Memo<Extraction>,
    contents: Memo<ArchiveContents>,
}

impl WarAnalyzer {
    pub fn web(path: impl Into<PathBuf>, config: Arc<AnalysisConfig>) -> Self {
        Self::with_layout(path.into(), config, Layout::Web)
    }

    pub fn self_contained(path: impl Into<PathBuf>, config: Arc<AnalysisConfig>) -> Self {
        Self::with_layout(path.into(), config, Layout::SelfContained)
    }

    fn with_layout(path: PathBuf, config: Arc<AnalysisConfig>, layout: Layout) -> Self {
        Self {
            path,
            parent: None,
            config,
            layout,
            digest: Memo::default(),
            extraction: Memo::default(),
            contents: Memo::default(),
        }
    }

    pub fn with_parent(mut self, parent: Option<&Path>) -> Self {
        self.parent = parent.map(Path::to_path_buf);
        self
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Root of the extracted tree once `analyze` ran.
    pub fn extracted_root(&self) -> Option<&Path> {
        self.extraction.get().map(Extraction::root)
    }

    fn contents(&self, cancel: &CancelToken) -> Result<&ArchiveContents, AnalysisError> {
        self.contents.get_or_try_init(|| self.scan(cancel))
    }

    fn scan(&self, cancel: &CancelToken) -> Result<ArchiveContents, AnalysisError> {
        let digest = self.digest()?;
        let extraction = self.extraction.get_or_try_init(|| {
            let extraction = Extraction::prepare(&self.config, &self.path, digest)?;
            extract_zip(&self.path, extraction.root(), cancel)?;
            Ok::<_, AnalysisError>(extraction)
        })?;
        let root = extraction.root();
        let mut contents = ArchiveContents::default();

        self.analyze_classes(root, cancel, &mut contents)?;
        self.collect_descriptors(root, &mut contents.bundled)?;
        contents.children = self.analyze_libraries(root, cancel)?;

        tracing::info!(
            archive = %self.path.display(),
            kind = ?self.layout.kind(),
            constructs = contents.constructs.len(),
            children = contents.children.len(),
            "exploded archive analyzed"
        );
        Ok(contents)
    }

    fn analyze_classes(
        &self,
        root: &Path,
        cancel: &CancelToken,
        contents: &mut ArchiveContents,
    ) -> Result<(), AnalysisError> {
        let classes = root.join(self.layout.classes_dir());
        if !classes.is_dir() {
            return Ok(());
        }
        if let Err(e) = self.config.classpath.register(&classes) {
            tracing::warn!(path = %classes.display(), error = %e, "classpath registration failed");
        }
        for file in scan_files(&classes, &["class"]) {
            cancel.check(&self.path)?;
            let Some(entry) = relative_entry_name(&classes, &file) else {
                tracing::warn!(path = %file.display(), "skipping class file with a non UTF-8 path");
                continue;
            };
            let bytes = fs::read(&file).map_err(|e| AnalysisError::io(&file, e))?;
            add_class(contents, &file, &entry, &bytes);
        }
        Ok(())
    }

    fn collect_descriptors(
        &self,
        root: &Path,
        bundled: &mut BTreeSet<LibraryId>,
    ) -> Result<(), AnalysisError> {
        for file in scan_files(&root.join("META-INF/maven"), &["xml", "properties"]) {
            let Some(entry) = relative_entry_name(root, &file) else {
                continue;
            };
            if is_maven_descriptor(&entry) {
                let bytes = fs::read(&file).map_err(|e| AnalysisError::io(&file, e))?;
                add_maven_descriptor(bundled, &entry, &bytes);
            }
        }
        Ok(())
    }

    fn analyze_libraries(
        &self,
        root: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<Arc<dyn ArchiveAnalyzer>>, AnalysisError> {
        let mut archives = scan_files(&root.join(self.layout.lib_dir()), &["jar"]);
        if self.layout == Layout::Web
            && let Some(include) = &self.config.include_dir
        {
            archives.extend(scan_files(include, &["jar"]));
        }
        if archives.is_empty() {
            return Ok(Vec::new());
        }
        cancel.check(&self.path)?;

        let mut child = Orchestrator::new(
            Arc::clone(&self.config),
            self.config.nested_pool_size,
            None,
        )
        .with_parent_cancel(cancel.clone());
        child
            .start_analysis(
                archives.into_iter().map(|p| (p, None)).collect(),
                Some(&self.path),
            )
            .map_err(|e| AnalysisError::Nested {
                path: self.path.clone(),
                source: Box::new(e),
            })?;
        cancel.check(&self.path)?;
        Ok(child.completed())
    }
}

impl ArchiveAnalyzer for WarAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn kind(&self) -> ArchiveKind {
        self.layout.kind()
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
    use crate::classfile::testing::{ClassSpec, build};
    use std::fs::File;
    use std::io::Write;
    use zip::write::{FileOptions, ZipWriter};

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn jar_bytes(dir: &Path, name: &str, class: &str) -> anyhow::Result<Vec<u8>> {
        let path = dir.join(name);
        let bytes = build(&ClassSpec::new(class).method(0x0001, "run", "()V"));
        let entry = format!("{class}.class");
        write_zip(&path, &[(entry.as_str(), bytes.as_slice())])?;
        Ok(fs::read(path)?)
    }

    #[test]
    fn war_analyzes_classes_and_nested_jars() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lib_a = jar_bytes(dir.path(), "a.jar", "lib/a/A")?;
        let lib_b = jar_bytes(dir.path(), "b.jar", "lib/b/B")?;
        let app_class = build(&ClassSpec::new("com/acme/web/Servlet").method(0x0001, "doGet", "(I)V"));
        let war = dir.path().join("app.war");
        write_zip(
            &war,
            &[
                ("WEB-INF/classes/com/acme/web/Servlet.class", app_class.as_slice()),
                ("WEB-INF/lib/a-1.0.jar", lib_a.as_slice()),
                ("WEB-INF/lib/b-2.0.jar", lib_b.as_slice()),
                (
                    "META-INF/maven/com.acme/web/pom.properties",
                    b"groupId=com.acme\nartifactId=web\nversion=3\n",
                ),
            ],
        )?;

        let config = Arc::new(AnalysisConfig::default());
        let analyzer = WarAnalyzer::web(&war, Arc::clone(&config));
        analyzer.analyze(&CancelToken::new())?;

        let qnames: Vec<String> = analyzer.constructs()?.keys().map(|id| id.qualified_name()).collect();
        assert!(qnames.contains(&"com.acme.web.Servlet.doGet(int)".to_string()));
        assert!(!qnames.iter().any(|q| q.starts_with("lib.")));
        assert!(analyzer
            .bundled_libraries()?
            .contains(&LibraryId::maven("com.acme", "web", "3")));

        let children = analyzer.children();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.parent() == Some(war.as_path())));
        assert!(children.iter().all(|c| c.kind() == ArchiveKind::Jar));

        let root = analyzer.extracted_root().map(Path::to_path_buf);
        let classes = root.map(|r| r.join("WEB-INF/classes"));
        assert!(config.classpath.entries().iter().any(|e| Some(e) == classes.as_ref()));
        Ok(())
    }

    #[test]
    fn self_contained_jar_uses_boot_inf_layout() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let lib = jar_bytes(dir.path(), "dep.jar", "dep/D")?;
        let main = build(&ClassSpec::new("app/Main").method(0x0009, "main", "([Ljava/lang/String;)V"));
        let boot = dir.path().join("boot.jar");
        write_zip(
            &boot,
            &[
                ("BOOT-INF/classes/app/Main.class", main.as_slice()),
                ("BOOT-INF/lib/dep.jar", lib.as_slice()),
            ],
        )?;

        let analyzer = WarAnalyzer::self_contained(&boot, Arc::new(AnalysisConfig::default()));
        analyzer.analyze(&CancelToken::new())?;
        assert_eq!(analyzer.kind(), ArchiveKind::SelfContainedJar);
        assert!(analyzer
            .constructs()?
            .keys()
            .any(|id| id.qualified_name() == "app.Main.main(String[])"));
        assert_eq!(analyzer.children().len(), 1);
        Ok(())
    }

    #[test]
    fn configured_work_dir_keeps_extraction() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let war = dir.path().join("empty.war");
        write_zip(&war, &[("index.html", b"<html/>")])?;
        let work = dir.path().join("work");
        let config = AnalysisConfig {
            work_dir: Some(work.clone()),
            ..AnalysisConfig::default()
        };

        let root = {
            let analyzer = WarAnalyzer::web(&war, Arc::new(config));
            analyzer.analyze(&CancelToken::new())?;
            assert!(analyzer.children().is_empty());
            analyzer.extracted_root().map(Path::to_path_buf)
        };
        let root = root.ok_or_else(|| anyhow::anyhow!("not extracted"))?;
        assert!(root.starts_with(&work));
        assert!(root.join("index.html").is_file());
        Ok(())
    }
}
