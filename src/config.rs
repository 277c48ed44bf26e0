use std::collections::{BTreeSet, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;
use crate::library::LibraryId;

pub const ENV_WORK_DIR: &str = "CONSTRUCT_SCAN_WORK_DIR";
pub const ENV_LIB_DIR: &str = "CONSTRUCT_SCAN_LIB_DIR";
pub const ENV_POLL_MS: &str = "CONSTRUCT_SCAN_POLL_MS";

/// The application whose dependencies are being analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppContext {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

/// Append-only set of classpath entries, shared by every analyzer of a run.
#[derive(Debug, Clone, Default)]
pub struct Classpath {
    entries: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl Classpath {
    /// Adds `path`. Returns whether it was new; fails if it does not exist.
    pub fn register(&self, path: &Path) -> Result<bool, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingPath(path.to_path_buf()));
        }
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.insert(path.to_path_buf()))
    }

    pub fn entries(&self) -> Vec<PathBuf> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Settings threaded through the orchestrator and every archive analyzer.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub app_context: Option<AppContext>,
    pub classpath: Classpath,
    /// Archives under this directory are added to the classpath.
    pub lib_dir: Option<PathBuf>,
    /// Extra archives a WAR analyzer treats like `WEB-INF/lib`.
    pub include_dir: Option<PathBuf>,
    /// Extraction root. When unset each archive analyzer owns a temporary
    /// directory removed on drop.
    pub work_dir: Option<PathBuf>,
    pub known_libraries: HashMap<PathBuf, LibraryId>,
    pub poll_interval: Duration,
    /// Worker count of the child orchestrations spawned for nested archives.
    pub nested_pool_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            app_context: None,
            classpath: Classpath::default(),
            lib_dir: None,
            include_dir: None,
            work_dir: None,
            known_libraries: HashMap::new(),
            poll_interval: Duration::from_millis(50),
            nested_pool_size: 4,
        }
    }
}

impl AnalysisConfig {
    /// Defaults overlaid with the `CONSTRUCT_SCAN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(dir) = env::var(ENV_WORK_DIR) {
            config.work_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = env::var(ENV_LIB_DIR) {
            config.lib_dir = Some(PathBuf::from(dir));
        }
        if let Ok(raw) = env::var(ENV_POLL_MS) {
            let ms: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_POLL_MS,
                value: raw.clone(),
            })?;
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        Ok(config)
    }

    pub fn known_library(&self, path: &Path) -> Option<&LibraryId> {
        self.known_libraries.get(path)
    }

    /// Directory an archive is extracted to when a work dir is configured:
    /// `<work_dir>/<file name>-<digest prefix>`.
    pub fn extraction_dir(&self, archive: &Path, digest: &str) -> Option<PathBuf> {
        let work_dir = self.work_dir.as_ref()?;
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let prefix = digest.get(..12).unwrap_or(digest);
        Some(work_dir.join(format!("{name}-{prefix}")))
    }
}

/// Per-user default for `--work-dir`.
pub fn default_work_dir() -> Option<PathBuf> {
    dirs::cache_dir()
        .or_else(dirs::data_local_dir)
        .map(|base| base.join("construct-scan"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classpath_is_append_only_and_duplicate_safe() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let classpath = Classpath::default();
        let shared = classpath.clone();

        assert!(classpath.register(dir.path())?);
        assert!(!shared.register(dir.path())?);
        assert_eq!(classpath.entries(), vec![dir.path().to_path_buf()]);

        let missing = dir.path().join("missing.jar");
        assert!(matches!(
            classpath.register(&missing),
            Err(ConfigError::MissingPath(_))
        ));
        Ok(())
    }

    #[test]
    fn extraction_dir_uses_name_and_digest_prefix() {
        let config = AnalysisConfig {
            work_dir: Some(PathBuf::from("/work")),
            ..AnalysisConfig::default()
        };
        assert_eq!(
            config.extraction_dir(Path::new("/in/app.war"), "0123456789abcdef"),
            Some(PathBuf::from("/work/app.war-0123456789ab"))
        );
        assert_eq!(
            AnalysisConfig::default().extraction_dir(Path::new("a.war"), "00"),
            None
        );
    }

    #[test]
    fn defaults_match_nested_orchestration_settings() {
        let config = AnalysisConfig::default();
        assert_eq!(config.nested_pool_size, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(config.known_library(Path::new("x.jar")).is_none());
    }
}
