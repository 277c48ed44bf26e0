//! Archive Analysis Orchestrator.
//!
//! Runs one task per archive on a fixed-size rayon pool. The submitting
//! thread polls task states at `AnalysisConfig::poll_interval` so it can
//! enforce the timeout; on expiry every open task's [`CancelToken`] is set
//! and a [`OrchestratorError::Timeout`] is returned. Tasks that completed
//! before the deadline stay retrievable through [`Orchestrator::analyzers`].
//!
//! A failing task is logged and excluded; it never aborts its siblings.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::aar::AarAnalyzer;
use crate::analyzer::{ArchiveAnalyzer, CancelToken, flatten};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, OrchestratorError};
use crate::jar::JarAnalyzer;
use crate::probe::has_entry_prefix;
use crate::pyarchive::{PythonArchiveAnalyzer, is_python_archive};
use crate::scan::scan_files;
use crate::war::WarAnalyzer;

/// Entry marker of a self-contained (Spring Boot style) JAR.
pub const SELF_CONTAINED_MARKER: &str = "BOOT-INF/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }
}

#[derive(Debug, Clone)]
struct Task {
    analyzer: Arc<dyn ArchiveAnalyzer>,
    cancel: CancelToken,
    state: Arc<Mutex<TaskState>>,
}

impl Task {
    fn new(analyzer: Arc<dyn ArchiveAnalyzer>) -> Self {
        Self {
            analyzer,
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(TaskState::Pending)),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TaskState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    fn state(&self) -> TaskState {
        self.with_state(|s| *s)
    }

    /// Pending -> Running. False when the task was canceled before it started.
    fn begin(&self) -> bool {
        self.with_state(|s| {
            if *s == TaskState::Pending && !self.cancel.is_canceled() {
                *s = TaskState::Running;
                true
            } else {
                *s = TaskState::Canceled;
                false
            }
        })
    }

    fn finish(&self, state: TaskState) {
        self.with_state(|s| *s = state);
    }

    /// Requests cancellation. Returns whether the task was still open.
    fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.with_state(|s| {
            if s.is_finished() {
                false
            } else {
                *s = TaskState::Canceled;
                true
            }
        })
    }
}

/// `-1` (or any negative value) means no timeout.
pub fn timeout_from_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}

#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<AnalysisConfig>,
    pool_size: usize,
    timeout: Option<Duration>,
    parent_cancel: Option<CancelToken>,
    known: Vec<Arc<dyn ArchiveAnalyzer>>,
    tasks: Vec<Task>,
}

impl Orchestrator {
    pub fn new(config: Arc<AnalysisConfig>, pool_size: usize, timeout: Option<Duration>) -> Self {
        Self {
            config,
            pool_size: pool_size.max(1),
            timeout,
            parent_cancel: None,
            known: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Ties a child orchestration to the task that spawned it: once `token`
    /// is canceled every open child task is canceled too.
    pub fn with_parent_cancel(mut self, token: CancelToken) -> Self {
        self.parent_cancel = Some(token);
        self
    }

    /// Analyzes every path that comes without an analyzer.
    ///
    /// Paths paired with an analyzer are kept as-is. Paths already analyzed
    /// by an earlier call are not analyzed again.
    pub fn start_analysis(
        &mut self,
        paths: Vec<(PathBuf, Option<Arc<dyn ArchiveAnalyzer>>)>,
        parent: Option<&Path>,
    ) -> Result<(), OrchestratorError> {
        if let Some(app) = &self.config.app_context {
            tracing::info!(
                group = %app.group,
                artifact = %app.artifact,
                version = %app.version,
                "analyzing dependencies of application"
            );
        }

        let mut unknown = Vec::new();
        let mut seen = BTreeSet::new();
        for (path, analyzer) in paths {
            self.register_classpath(&path);
            match analyzer {
                Some(analyzer) => {
                    if !self.is_known(&path) {
                        self.known.push(analyzer);
                    }
                }
                None => {
                    if seen.insert(path.clone()) {
                        unknown.push(path);
                    }
                }
            }
        }
        if let Some(lib_dir) = self.config.lib_dir.clone() {
            for jar in scan_files(&lib_dir, &["jar"]) {
                self.register_classpath(&jar);
            }
        }

        let mut analyzers = Vec::new();
        for path in unknown {
            if self.is_known(&path) {
                tracing::debug!(path = %path.display(), "already analyzed");
                continue;
            }
            match select_analyzer(&path, parent, &self.config) {
                Ok(Some(analyzer)) => analyzers.push(analyzer),
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "unsupported archive type, skipping")
                }
                Err(e) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "cannot open archive, skipping"
                ),
            }
        }
        self.submit(analyzers)
    }

    /// Runs the given analyzers as one batch and waits for them.
    pub fn submit(
        &mut self,
        analyzers: Vec<Arc<dyn ArchiveAnalyzer>>,
    ) -> Result<(), OrchestratorError> {
        if analyzers.is_empty() {
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.pool_size)
            .thread_name(|i| format!("archive-analysis-{i}"))
            .build()?;

        let first = self.tasks.len();
        for analyzer in analyzers {
            let task = Task::new(analyzer);
            self.tasks.push(task.clone());
            pool.spawn(move || run_task(&task));
        }
        tracing::debug!(tasks = self.tasks.len() - first, pool = self.pool_size, "submitted");

        // No further work is accepted; spawned jobs still run to completion.
        drop(pool);
        self.wait(first)
    }

    fn wait(&self, first: usize) -> Result<(), OrchestratorError> {
        let batch = &self.tasks[first..];
        let started = Instant::now();

        loop {
            let open: Vec<&Task> = batch.iter().filter(|t| !t.state().is_finished()).collect();
            if open.is_empty() {
                break;
            }
            if self
                .parent_cancel
                .as_ref()
                .is_some_and(CancelToken::is_canceled)
            {
                let canceled = open.iter().filter(|t| t.cancel()).count();
                tracing::debug!(canceled, "parent canceled, child tasks canceled");
                return Ok(());
            }
            let mut pause = self.config.poll_interval;
            if let Some(timeout) = self.timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    let canceled = open.iter().filter(|t| t.cancel()).count();
                    for task in &open {
                        tracing::warn!(path = %task.analyzer.path().display(), "canceled on timeout");
                    }
                    return Err(OrchestratorError::Timeout { timeout, canceled });
                }
                pause = pause.min(timeout - elapsed);
            }
            thread::sleep(pause);
        }

        let count = |state| batch.iter().filter(|t| t.state() == state).count();
        tracing::info!(
            completed = count(TaskState::Completed),
            failed = count(TaskState::Failed),
            canceled = count(TaskState::Canceled),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "archive analysis finished"
        );
        Ok(())
    }

    /// Caller-supplied analyzers plus every completed one, with nested
    /// children flattened in, in submission order.
    pub fn analyzers(&self) -> Vec<Arc<dyn ArchiveAnalyzer>> {
        self.known
            .iter()
            .cloned()
            .chain(self.completed())
            .flat_map(|a| flatten(&a))
            .collect()
    }

    /// Completed analyzers of this orchestration, without their children.
    pub fn completed(&self) -> Vec<Arc<dyn ArchiveAnalyzer>> {
        self.tasks
            .iter()
            .filter(|t| t.state() == TaskState::Completed)
            .map(|t| Arc::clone(&t.analyzer))
            .collect()
    }

    pub fn task_states(&self) -> Vec<(PathBuf, TaskState)> {
        self.tasks
            .iter()
            .map(|t| (t.analyzer.path().to_path_buf(), t.state()))
            .collect()
    }

    /// First analyzer whose path ends with `subpath`, compared component
    /// by component. Ambiguous suffixes resolve to the earliest analyzer.
    pub fn analyzer_for_subpath(&self, subpath: &Path) -> Option<Arc<dyn ArchiveAnalyzer>> {
        self.analyzers()
            .into_iter()
            .find(|a| a.path().ends_with(subpath))
    }

    fn is_known(&self, path: &Path) -> bool {
        self.known.iter().any(|a| a.path() == path)
            || self
                .tasks
                .iter()
                .any(|t| t.analyzer.path() == path && t.state() == TaskState::Completed)
    }

    fn register_classpath(&self, path: &Path) {
        if let Err(e) = self.config.classpath.register(path) {
            tracing::warn!(path = %path.display(), error = %e, "classpath registration failed");
        }
    }
}

/// Picks the archive analyzer for `path` by extension. `Ok(None)` for
/// unsupported extensions.
pub fn select_analyzer(
    path: &Path,
    parent: Option<&Path>,
    config: &Arc<AnalysisConfig>,
) -> Result<Option<Arc<dyn ArchiveAnalyzer>>, AnalysisError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let config = Arc::clone(config);

    let analyzer: Arc<dyn ArchiveAnalyzer> = if name.ends_with(".jar") {
        if has_entry_prefix(path, SELF_CONTAINED_MARKER)? {
            Arc::new(WarAnalyzer::self_contained(path, config).with_parent(parent))
        } else {
            Arc::new(JarAnalyzer::new(path, config).with_parent(parent))
        }
    } else if name.ends_with(".war") {
        Arc::new(WarAnalyzer::web(path, config).with_parent(parent))
    } else if name.ends_with(".aar") {
        Arc::new(AarAnalyzer::new(path, config).with_parent(parent))
    } else if is_python_archive(&name) {
        Arc::new(PythonArchiveAnalyzer::new(path, config).with_parent(parent))
    } else {
        return Ok(None);
    };
    Ok(Some(analyzer))
}

fn run_task(task: &Task) {
    let path = task.analyzer.path();
    if !task.begin() {
        tracing::debug!(path = %path.display(), "canceled before start");
        return;
    }
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| task.analyzer.analyze(&task.cancel)));

    match outcome {
        Ok(Ok(())) => {
            task.finish(TaskState::Completed);
            tracing::info!(
                path = %path.display(),
                kind = ?task.analyzer.kind(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "archive analyzed"
            );
        }
        Ok(Err(e)) if e.is_canceled() => {
            task.finish(TaskState::Canceled);
            tracing::info!(path = %path.display(), "archive analysis canceled");
        }
        Ok(Err(e)) => {
            task.finish(TaskState::Failed);
            tracing::error!(
                path = %path.display(),
                error = %e,
                cause = ?std::error::Error::source(&e).map(ToString::to_string),
                "archive analysis failed"
            );
        }
        Err(_) => {
            task.finish(TaskState::Failed);
            tracing::error!(path = %path.display(), "archive analyzer panicked");
        }
    }
}
