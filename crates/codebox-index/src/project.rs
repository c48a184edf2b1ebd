//! One indexed project: its current generation, build lock and watcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use codebox_core::{CodeboxConfig, CodeboxError, ProfileName, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::builder::{build_generation, BuildContext, BuildMode, BuildOptions, BuildReport};
use crate::embedding::{embedder_from_config, Embedder};
use crate::generation::{Generation, GenerationDir};
use crate::profile::ResolvedProfile;
use crate::search::{run_search, SearchContext, SearchRequest, SearchResponse};
use crate::sync::{spawn_watcher, SyncHandle};

/// Times `CURRENT` is re-read when the generation it names disappears
/// before it can be opened.
const RELOAD_ATTEMPTS: usize = 3;

/// Index statistics for `codebox stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    /// Project root.
    pub root: PathBuf,
    /// Current generation id.
    pub generation_id: u64,
    /// Layout version of the current generation.
    pub schema_version: u32,
    /// Number of chunks.
    pub total_chunks: usize,
    /// Number of files.
    pub total_files: usize,
    /// Chunks carrying an embedding.
    pub embedded_chunks: usize,
    /// Files chunked by line windows after a parse failure.
    pub degraded_files: usize,
    /// Stored vector dimension; 0 without embeddings.
    pub dimension: usize,
    /// Profile the generation was built with.
    pub profile: ResolvedProfile,
    /// Model the generation was embedded with.
    pub model: Option<String>,
    /// Model the current configuration would use.
    pub configured_model: Option<String>,
    /// Whether the two models differ; vector search is unavailable until a rebuild.
    pub model_mismatch: bool,
    /// Chunk count per language id.
    pub languages: BTreeMap<String, usize>,
    /// Chunk count per chunk kind.
    pub kinds: BTreeMap<String, usize>,
    /// Size of the generation file in bytes.
    pub index_size_bytes: u64,
    /// Build completion time, unix seconds.
    pub created_at: u64,
}

/// A project root with its generations.
///
/// Readers take an `Arc` of the current generation and keep it for the
/// whole query, so a build that completes mid-query never disturbs them.
/// Only one build runs at a time; a second one fails with
/// [`CodeboxError::BuildInProgress`].
///
/// # Examples
///
/// ```no_run
/// use codebox_core::CodeboxConfig;
/// use codebox_index::{BuildOptions, Project, SearchRequest};
///
/// # async fn run() -> codebox_core::Result<()> {
/// let project = Project::from_config(".".as_ref(), CodeboxConfig::default())?;
/// project.build(BuildOptions::default()).await?;
/// let response = project.search(SearchRequest::new("parse config")).await?;
/// println!("{} results", response.results.len());
/// # Ok(())
/// # }
/// ```
pub struct Project {
    root: PathBuf,
    config: Arc<CodeboxConfig>,
    embedder: Option<Arc<dyn Embedder>>,
    dir: GenerationDir,
    current: RwLock<Option<Arc<Generation>>>,
    build_lock: Mutex<()>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("data_dir", &self.dir.path())
            .field("generation", &self.current().map(|g| g.id()))
            .finish()
    }
}

impl Project {
    /// Open the project at `root` with the embedder named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Config`] if the embedding provider is
    /// misconfigured, plus any error from [`Project::open`].
    pub fn from_config(root: &Path, config: CodeboxConfig) -> Result<Self> {
        let embedder = embedder_from_config(&config.embedding)?;
        Self::open(root, config, embedder)
    }

    /// Open the project at `root`, loading its current generation if any.
    ///
    /// Generation files that are not current are left over from crashed or
    /// superseded builds and are removed, unless a build in another process
    /// holds the data directory's build lock.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::FileNotFound`] if `root` does not exist, or
    /// [`CodeboxError::Io`] if the data directory cannot be created.
    pub fn open(
        root: &Path,
        config: CodeboxConfig,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|_| CodeboxError::FileNotFound(root.to_path_buf()))?;
        let dir = GenerationDir::new(config.data_dir(&root));
        std::fs::create_dir_all(dir.path())?;

        // Holding the lock keeps CURRENT still between loading and sweeping.
        let lock = match dir.try_lock_builds() {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(error = %e, "cannot take build lock, skipping cleanup");
                None
            }
        };
        let current = load_current(&dir);
        match &lock {
            Some(lock) => dir.sweep(current.as_ref().map(|g| g.id()), lock),
            None => tracing::debug!("a build is running, leaving generation files alone"),
        }
        drop(lock);
        if let Some(generation) = &current {
            tracing::debug!(generation = generation.id(), root = %root.display(), "opened project");
        }

        Ok(Self {
            root,
            config: Arc::new(config),
            embedder,
            dir,
            current: RwLock::new(current),
            build_lock: Mutex::new(()),
        })
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration the project was opened with.
    pub fn config(&self) -> &CodeboxConfig {
        &self.config
    }

    /// Directory holding the generation files.
    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// The current generation, if the project has been indexed.
    pub fn current(&self) -> Option<Arc<Generation>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether a build started through this handle is running.
    pub fn is_building(&self) -> bool {
        self.build_lock.try_lock().is_err()
    }

    /// Build a new generation from every file under the root and make it current.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::BuildInProgress`] if another build is running,
    /// [`CodeboxError::FailureThreshold`] if too many files are unreadable,
    /// [`CodeboxError::Timeout`] or [`CodeboxError::Cancelled`] if the build
    /// is stopped. The previous generation stays current on every error.
    pub async fn build(&self, options: BuildOptions) -> Result<BuildReport> {
        self.run_build(BuildMode::Full, options).await
    }

    /// Rebuild only what changed since the current generation.
    ///
    /// Behaves as [`Project::build`] when the project has no index yet.
    ///
    /// # Errors
    ///
    /// Same as [`Project::build`].
    pub async fn incremental_sync(&self, options: BuildOptions) -> Result<BuildReport> {
        self.run_build(BuildMode::Incremental { hint: None }, options).await
    }

    /// Incremental build that re-reads only `paths`.
    ///
    /// Paths may be absolute or relative to the root; directories are
    /// expanded.
    ///
    /// # Errors
    ///
    /// Same as [`Project::build`].
    pub async fn sync_paths(&self, paths: Vec<PathBuf>, options: BuildOptions) -> Result<BuildReport> {
        self.run_build(BuildMode::Incremental { hint: Some(paths) }, options)
            .await
    }

    async fn run_build(&self, mode: BuildMode, options: BuildOptions) -> Result<BuildReport> {
        let _guard = self
            .build_lock
            .try_lock()
            .map_err(|_| CodeboxError::BuildInProgress(self.root.clone()))?;
        let _dir_lock = self
            .dir
            .try_lock_builds()?
            .ok_or_else(|| CodeboxError::BuildInProgress(self.root.clone()))?;

        let previous = self.refresh();
        let mode = match (mode, &previous) {
            (BuildMode::Incremental { .. }, None) => BuildMode::Full,
            (mode, _) => mode,
        };
        let generation_id = self.dir.next_id()?;
        let ctx = BuildContext {
            root: self.root.clone(),
            config: Arc::clone(&self.config),
            embedder: self.embedder.clone(),
            dir: self.dir.clone(),
        };
        let cancel = options.cancel.child_token();
        tracing::info!(generation = generation_id, ?mode, "build started");

        let build = build_generation(&ctx, previous, mode, &options, generation_id, &cancel);
        let outcome = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, build).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    cancel.cancel();
                    Err(CodeboxError::Timeout("build"))
                }
            },
            None => build.await,
        };
        let (generation, report) = match outcome {
            Ok(built) => built,
            Err(e) => {
                tracing::warn!(generation = generation_id, error = %e, "build failed, keeping current generation");
                return Err(e);
            }
        };

        self.install(generation)?;
        tracing::info!(
            generation = report.generation_id,
            files = report.files_indexed,
            chunks = report.chunks,
            elapsed_ms = report.elapsed_ms,
            "build finished"
        );
        Ok(report)
    }

    /// Make `generation` current and retire the one it replaces.
    ///
    /// Called with the build lock held.
    fn install(&self, generation: Generation) -> Result<()> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // An error here drops the unclaimed generation and its file.
        self.dir.write_current(generation.id())?;
        generation.keep();
        let previous = guard.replace(Arc::new(generation));
        drop(guard);
        if let Some(previous) = previous {
            previous.retire();
        }
        Ok(())
    }

    /// The current generation, reloaded first when `CURRENT` names another
    /// one.
    ///
    /// Another process sharing the data directory may have installed a
    /// newer generation and removed the file this handle was holding.
    fn refresh(&self) -> Option<Arc<Generation>> {
        let held = self.current();
        for _ in 0..RELOAD_ATTEMPTS {
            let id = match self.dir.read_current() {
                Ok(Some(id)) => id,
                Ok(None) => return held,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable CURRENT");
                    return held;
                }
            };
            if held.as_ref().is_some_and(|g| g.id() == id) {
                return held;
            }
            let generation = match Generation::open(id, self.dir.file_for(id)) {
                Ok(generation) => Arc::new(generation),
                Err(e) => {
                    tracing::debug!(generation = id, error = %e, "generation replaced while loading");
                    continue;
                }
            };
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(newer) = guard.as_ref().filter(|g| g.id() >= id) {
                return Some(Arc::clone(newer));
            }
            tracing::debug!(generation = id, "loaded generation installed elsewhere");
            *guard = Some(Arc::clone(&generation));
            return Some(generation);
        }
        tracing::warn!("CURRENT kept changing, using the generation already loaded");
        held
    }

    /// Query the current generation.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::NoIndex`] before the first build,
    /// [`CodeboxError::InvalidQuery`] for an unusable query,
    /// [`CodeboxError::BackendUnavailable`] when vector or hybrid mode
    /// cannot embed, and [`CodeboxError::Timeout`] past the deadline.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let generation = self
            .refresh()
            .ok_or_else(|| CodeboxError::NoIndex(self.root.clone()))?;
        match self.search_in(Arc::clone(&generation), request.clone()).await {
            Err(e) if vanished(&generation, &e) => {
                let retry = self
                    .refresh()
                    .ok_or_else(|| CodeboxError::NoIndex(self.root.clone()))?;
                self.search_in(retry, request).await
            }
            outcome => outcome,
        }
    }

    async fn search_in(
        &self,
        generation: Arc<Generation>,
        request: SearchRequest,
    ) -> Result<SearchResponse> {
        let ctx = SearchContext {
            root: self.root.clone(),
            config: Arc::clone(&self.config),
            embedder: self.embedder.clone(),
        };
        let limit = request
            .timeout
            .unwrap_or(Duration::from_secs(self.config.search.timeout_secs));
        tokio::time::timeout(limit, run_search(&ctx, generation, request))
            .await
            .map_err(|_| CodeboxError::Timeout("search"))?
    }

    /// Statistics of the current generation.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::NoIndex`] before the first build, or
    /// [`CodeboxError::Database`] if the generation cannot be read.
    pub fn stats(&self) -> Result<ProjectStats> {
        let mut generation = self
            .refresh()
            .ok_or_else(|| CodeboxError::NoIndex(self.root.clone()))?;
        let stats = match generation.reader().and_then(|store| store.stats()) {
            Err(e) if vanished(&generation, &e) => {
                generation = self
                    .refresh()
                    .ok_or_else(|| CodeboxError::NoIndex(self.root.clone()))?;
                generation.reader()?.stats()?
            }
            outcome => outcome?,
        };
        let meta = generation.meta();
        let configured_model = self.embedder.as_ref().map(|e| e.model_name().to_string());
        let model_mismatch = match (&meta.model, &configured_model) {
            (Some(built), Some(configured)) => built != configured,
            (Some(_), None) => true,
            _ => false,
        };
        Ok(ProjectStats {
            root: self.root.clone(),
            generation_id: generation.id(),
            schema_version: meta.schema_version,
            total_chunks: stats.total_chunks,
            total_files: stats.total_files,
            embedded_chunks: stats.embedded_chunks,
            degraded_files: stats.degraded_files,
            dimension: meta.dimension,
            profile: meta.profile.clone(),
            model: meta.model.clone(),
            configured_model,
            model_mismatch,
            languages: stats.languages,
            kinds: stats.kinds,
            index_size_bytes: stats.index_size_bytes,
            created_at: meta.created_at,
        })
    }

    /// Start the sync watcher for this project.
    ///
    /// The watcher stops when `cancel` fires, when the root disappears or
    /// when the notification channel closes.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Watch`] if the filesystem watch cannot be
    /// established.
    pub fn watch(self: &Arc<Self>, cancel: CancellationToken) -> Result<SyncHandle> {
        spawn_watcher(Arc::clone(self), cancel)
    }

    /// Profile name of the current generation.
    pub fn profile(&self) -> Option<ProfileName> {
        self.refresh().map(|g| g.meta().profile.name)
    }
}

fn load_current(dir: &GenerationDir) -> Option<Arc<Generation>> {
    match dir.read_current() {
        Ok(Some(id)) => match Generation::open(id, dir.file_for(id)) {
            Ok(generation) => Some(Arc::new(generation)),
            Err(e) => {
                tracing::warn!(generation = id, error = %e, "current generation unreadable, ignoring it");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable CURRENT");
            None
        }
    }
}

/// Whether `err` came from `generation`'s file being removed underneath it.
fn vanished(generation: &Generation, err: &CodeboxError) -> bool {
    matches!(err, CodeboxError::Database(_)) && !generation.path().exists()
}
