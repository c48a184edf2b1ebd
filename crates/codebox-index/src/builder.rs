//! Building a new index generation.
//!
//! A build runs in three phases:
//! 1. read, plan and chunk on a rayon pool inside `spawn_blocking`;
//! 2. embed new chunks with bounded concurrency;
//! 3. write everything into a fresh generation file and seal it.
//!
//! Cancellation is observed between phases and while embedding. Any error or
//! cancellation drops the unfinished generation, which removes its file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use codebox_core::{CodeboxConfig, CodeboxError, ProfileName, Result};
use codebox_scan::{enumerate_files, read_source_file, SourceFile, WalkOptions};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chunk::Chunk;
use crate::chunker::chunk_source;
use crate::embedding::{EmbeddingAdapter, Embedder};
use crate::generation::{Generation, GenerationDir, PendingGeneration};
use crate::profile::{resolve_profile, ResolvedProfile};
use crate::store::{FileRecord, IndexMeta, SCHEMA_VERSION};

/// What a build starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    /// Re-read and re-chunk every file.
    Full,
    /// Rebuild only files that changed since the current generation.
    Incremental {
        /// Paths reported by the watcher; only these are re-read.
        hint: Option<Vec<PathBuf>>,
    },
}

/// Caller-controlled build settings.
///
/// # Examples
///
/// ```
/// use codebox_core::ProfileName;
/// use codebox_index::builder::BuildOptions;
///
/// let options = BuildOptions::default();
/// assert_eq!(options.profile, ProfileName::Auto);
/// assert!(options.languages.is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Requested profile; ignored by incremental builds.
    pub profile: ProfileName,
    /// Language ids to index; ignored by incremental builds.
    pub languages: Option<Vec<String>>,
    /// Abort the build after this long.
    pub timeout: Option<Duration>,
    /// Stops the build between phases and while embedding.
    pub cancel: CancellationToken,
}

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Id of the generation that became current.
    pub generation_id: u64,
    /// Whether unchanged files were carried over.
    pub incremental: bool,
    /// Resolved profile.
    pub profile: ProfileName,
    /// Stored vector dimension; 0 without embeddings.
    pub dimension: usize,
    /// Files in the new generation.
    pub files_indexed: usize,
    /// Files chunked during this build.
    pub files_rebuilt: usize,
    /// Files carried over unchanged.
    pub files_reused: usize,
    /// Files dropped since the previous generation.
    pub files_removed: usize,
    /// Files that could not be read.
    pub files_failed: usize,
    /// Files chunked by line windows after a parse failure.
    pub files_degraded: usize,
    /// Chunks in the new generation.
    pub chunks: usize,
    /// Chunks with an embedding.
    pub embedded_chunks: usize,
    /// Wall-clock build time.
    pub elapsed_ms: u64,
}

/// Everything a build needs from its project.
#[derive(Clone)]
pub(crate) struct BuildContext {
    pub root: PathBuf,
    pub config: Arc<CodeboxConfig>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub dir: GenerationDir,
}

impl BuildContext {
    fn native_dimension(&self) -> usize {
        self.embedder
            .as_ref()
            .map(|e| e.native_dimension())
            .unwrap_or(self.config.embedding.dimensions)
    }
}

/// Output of the planning phase.
struct Prepared {
    profile: ResolvedProfile,
    dimension: usize,
    languages: Option<Vec<String>>,
    files: Vec<FileRecord>,
    chunks: Vec<Chunk>,
    incremental: bool,
    rebuilt: usize,
    reused: usize,
    removed: usize,
    failed: usize,
    degraded: usize,
}

/// Build generation `generation_id` and return it unclaimed: it is deleted
/// on drop unless the caller installs it.
pub(crate) async fn build_generation(
    ctx: &BuildContext,
    previous: Option<Arc<Generation>>,
    mode: BuildMode,
    options: &BuildOptions,
    generation_id: u64,
    cancel: &CancellationToken,
) -> Result<(Generation, BuildReport)> {
    let started = Instant::now();

    let prepared = {
        let ctx = ctx.clone();
        let options = options.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            prepare(&ctx, previous.as_deref(), &mode, &options, &cancel)
        })
        .await
        .map_err(join_error)??
    };
    if cancel.is_cancelled() {
        return Err(CodeboxError::Cancelled("build"));
    }

    let mut prepared = prepared;
    let model = match &ctx.embedder {
        Some(embedder) if prepared.dimension > 0 => {
            let adapter = EmbeddingAdapter::new(
                Arc::clone(embedder),
                prepared.dimension,
                ctx.config.embedding.batch_size,
                ctx.config.embedding.max_in_flight,
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(CodeboxError::Cancelled("build")),
                () = embed_missing(&adapter, &mut prepared.chunks) => {}
            }
            Some(adapter.model_name().to_string())
        }
        _ => None,
    };

    let report_base = ReportBase::from(&prepared);
    let meta = IndexMeta {
        generation_id,
        schema_version: SCHEMA_VERSION,
        profile: prepared.profile,
        dimension: if model.is_some() { prepared.dimension } else { 0 },
        model,
        languages: prepared.languages,
        created_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };
    let embedded_chunks = prepared
        .chunks
        .iter()
        .filter(|c| c.embedding.is_some())
        .count();
    let chunk_count = prepared.chunks.len();
    let files_indexed = prepared.files.len();

    let generation = {
        let dir = ctx.dir.clone();
        let cancel = cancel.clone();
        let files = prepared.files;
        let chunks = prepared.chunks;
        let dimension = meta.dimension;
        let profile = meta.profile.name;
        let generation = tokio::task::spawn_blocking(move || {
            let pending = PendingGeneration::create(&dir, generation_id)?;
            let store = pending.store()?;
            store.insert_batch(&files, &chunks)?;
            store.write_meta(&meta)?;
            if cancel.is_cancelled() {
                return Err(CodeboxError::Cancelled("build"));
            }
            pending.seal()
        })
        .await
        .map_err(join_error)??;
        tracing::debug!(generation = generation_id, %profile, dimension, "generation sealed");
        generation
    };

    let report = BuildReport {
        generation_id,
        incremental: report_base.incremental,
        profile: generation.meta().profile.name,
        dimension: generation.meta().dimension,
        files_indexed,
        files_rebuilt: report_base.rebuilt,
        files_reused: report_base.reused,
        files_removed: report_base.removed,
        files_failed: report_base.failed,
        files_degraded: report_base.degraded,
        chunks: chunk_count,
        embedded_chunks,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    Ok((generation, report))
}

struct ReportBase {
    incremental: bool,
    rebuilt: usize,
    reused: usize,
    removed: usize,
    failed: usize,
    degraded: usize,
}

impl From<&Prepared> for ReportBase {
    fn from(p: &Prepared) -> Self {
        Self {
            incremental: p.incremental,
            rebuilt: p.rebuilt,
            reused: p.reused,
            removed: p.removed,
            failed: p.failed,
            degraded: p.degraded,
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> CodeboxError {
    CodeboxError::Io(std::io::Error::other(format!("build task failed: {e}")))
}

async fn embed_missing(adapter: &EmbeddingAdapter, chunks: &mut [Chunk]) {
    let pending: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none())
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return;
    }
    let texts: Vec<String> = pending.iter().map(|&i| chunks[i].embedding_text()).collect();
    let vectors = adapter.embed_texts(&texts).await;
    let mut failed = 0usize;
    for (i, vector) in pending.into_iter().zip(vectors) {
        if vector.is_none() {
            failed += 1;
        }
        chunks[i].embedding = vector;
    }
    if failed > 0 {
        tracing::warn!(
            failed,
            total = texts.len(),
            "some chunks have no embedding and are searchable by keyword only"
        );
    }
}

/// Map a watcher path to a path relative to `root`.
fn relative_hint(root: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        path.strip_prefix(root).ok().map(Path::to_path_buf)
    } else {
        Some(path.to_path_buf())
    }
}

/// Decide which paths to read and which previous files to carry unread.
fn plan_paths(
    root: &Path,
    opts: &WalkOptions,
    base: Option<&BTreeMap<PathBuf, FileRecord>>,
    hint: Option<&[PathBuf]>,
) -> Result<(Vec<PathBuf>, BTreeSet<PathBuf>)> {
    let (Some(previous), Some(hint)) = (base, hint) else {
        return Ok((enumerate_files(root, opts)?, BTreeSet::new()));
    };

    let hints: Vec<PathBuf> = hint
        .iter()
        .filter_map(|h| relative_hint(root, h))
        .filter(|h| !h.as_os_str().is_empty() && !opts.is_ignored(h))
        .collect();

    let mut to_read = BTreeSet::new();
    let mut listing: Option<Vec<PathBuf>> = None;
    for h in &hints {
        let absolute = root.join(h);
        if absolute.is_dir() {
            if listing.is_none() {
                listing = Some(enumerate_files(root, opts)?);
            }
            if let Some(all) = &listing {
                to_read.extend(all.iter().filter(|p| p.starts_with(h)).cloned());
            }
        } else {
            to_read.insert(h.clone());
        }
    }

    let carry: BTreeSet<PathBuf> = previous
        .keys()
        .filter(|p| !hints.iter().any(|h| p.starts_with(h)))
        .cloned()
        .collect();
    Ok((to_read.into_iter().collect(), carry))
}

fn prepare(
    ctx: &BuildContext,
    previous: Option<&Generation>,
    mode: &BuildMode,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> Result<Prepared> {
    let config = &ctx.config;
    let root = ctx.root.as_path();
    let (base, hint) = match (mode, previous) {
        (BuildMode::Incremental { hint }, Some(generation)) => (Some(generation), hint.as_deref()),
        _ => (None, None),
    };

    let languages = match base {
        Some(generation) => generation.meta().languages.clone(),
        None => options.languages.clone(),
    };
    let opts = WalkOptions::from_config(&config.index).with_languages(languages.clone());

    let reader = base.map(|g| g.reader()).transpose()?;
    let previous_files: Option<BTreeMap<PathBuf, FileRecord>> = reader
        .as_ref()
        .map(|r| r.files())
        .transpose()?
        .map(|files| files.into_iter().map(|f| (f.path.clone(), f)).collect());

    let (to_read, carry_unread) = plan_paths(root, &opts, previous_files.as_ref(), hint)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.index.workers)
        .thread_name(|i| format!("codebox-chunk-{i}"))
        .build()
        .map_err(|e| CodeboxError::Config(format!("failed to start worker pool: {e}")))?;

    let outcomes: Vec<(PathBuf, Result<Option<SourceFile>>)> = pool.install(|| {
        to_read
            .par_iter()
            .map(|rel| (rel.clone(), read_source_file(root, rel, &opts)))
            .collect()
    });
    if cancel.is_cancelled() {
        return Err(CodeboxError::Cancelled("build"));
    }

    let mut failed = 0usize;
    let mut changed: Vec<SourceFile> = Vec::new();
    let mut carried_paths: BTreeSet<PathBuf> = carry_unread;
    let mut carried_records: BTreeMap<PathBuf, FileRecord> = BTreeMap::new();
    for (rel, outcome) in outcomes {
        let prior = previous_files.as_ref().and_then(|p| p.get(&rel));
        match outcome {
            Ok(Some(file)) => match prior {
                Some(record) if record.content_hash == file.content_hash => {
                    carried_records.insert(
                        rel.clone(),
                        FileRecord {
                            modified: file.modified,
                            size: file.size,
                            ..record.clone()
                        },
                    );
                    carried_paths.insert(rel);
                }
                _ => changed.push(file),
            },
            Ok(None) => {}
            Err(e) if matches!(&e, CodeboxError::Io(io) if io.kind() == std::io::ErrorKind::NotFound) => {
                tracing::debug!(path = %rel.display(), "file vanished before it was read");
            }
            Err(e) => {
                tracing::warn!(path = %rel.display(), error = %e, "failed to read file");
                failed += 1;
                if prior.is_some() {
                    carried_paths.insert(rel);
                }
            }
        }
    }

    let attempted = to_read.len();
    if attempted > 0 && failed as f64 > config.index.failure_threshold * attempted as f64 {
        return Err(CodeboxError::FailureThreshold {
            failed,
            total: attempted,
        });
    }

    let (profile, dimension) = match base {
        Some(generation) => {
            let meta = generation.meta();
            let dimension = if meta.dimension > 0 {
                meta.dimension.min(ctx.native_dimension())
            } else {
                meta.profile.dimension.min(ctx.native_dimension())
            };
            (meta.profile.clone(), dimension)
        }
        None => {
            let total_bytes: u64 = changed.iter().map(|f| f.size).sum();
            let profile = resolve_profile(
                options.profile,
                changed.len(),
                total_bytes,
                &config.profiles,
                ctx.native_dimension(),
            );
            let dimension = profile.dimension;
            (profile, dimension)
        }
    };

    // Carried embeddings are only valid for the same model and dimension.
    let reuse_embeddings = base.is_some_and(|g| {
        let meta = g.meta();
        meta.dimension == dimension
            && meta.model.as_deref() == ctx.embedder.as_ref().map(|e| e.model_name())
    });

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut files: Vec<FileRecord> = Vec::new();
    if let (Some(reader), Some(previous_files)) = (&reader, &previous_files) {
        for path in &carried_paths {
            let Some(record) = carried_records
                .remove(path)
                .or_else(|| previous_files.get(path).cloned())
            else {
                continue;
            };
            let mut carried = reader.chunks_for_file(path)?;
            if !reuse_embeddings {
                for chunk in &mut carried {
                    chunk.embedding = None;
                }
            }
            chunks.extend(carried);
            files.push(record);
        }
    }
    let reused = files.len();

    let params = profile.params.clone();
    let chunked: Vec<(FileRecord, Vec<Chunk>)> = pool.install(|| {
        changed
            .par_iter()
            .map(|file| {
                let result = chunk_source(file, &params);
                if result.degraded {
                    tracing::warn!(path = %file.path.display(), "syntax errors; indexed with line windows");
                }
                let record = FileRecord {
                    path: file.path.clone(),
                    language: file.language.id().to_string(),
                    size: file.size,
                    modified: file.modified,
                    content_hash: file.content_hash.clone(),
                    degraded: result.degraded,
                };
                (record, result.chunks)
            })
            .collect()
    });
    if cancel.is_cancelled() {
        return Err(CodeboxError::Cancelled("build"));
    }

    let rebuilt = chunked.len();
    let degraded = chunked.iter().filter(|(r, _)| r.degraded).count();
    for (record, file_chunks) in chunked {
        files.push(record);
        chunks.extend(file_chunks);
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let kept: BTreeSet<&PathBuf> = files.iter().map(|f| &f.path).collect();
    let removed = previous_files
        .as_ref()
        .map(|p| p.keys().filter(|k| !kept.contains(k)).count())
        .unwrap_or(0);

    tracing::info!(
        rebuilt,
        reused,
        removed,
        failed,
        degraded,
        chunks = chunks.len(),
        profile = %profile.name,
        "files chunked"
    );

    Ok(Prepared {
        profile,
        dimension,
        languages,
        files,
        chunks,
        incremental: base.is_some(),
        rebuilt,
        reused,
        removed,
        failed,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_hints_become_relative() {
        let root = Path::new("/work/project");
        assert_eq!(
            relative_hint(root, Path::new("/work/project/src/a.py")),
            Some(PathBuf::from("src/a.py"))
        );
        assert_eq!(relative_hint(root, Path::new("/elsewhere/b.py")), None);
        assert_eq!(
            relative_hint(root, Path::new("src/c.py")),
            Some(PathBuf::from("src/c.py"))
        );
    }

    #[test]
    fn hinted_plan_reads_only_hinted_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::write(root.join("a.py"), "x = 1\n").unwrap();
        std::fs::write(root.join("pkg/b.py"), "y = 2\n").unwrap();
        std::fs::write(root.join("pkg/c.py"), "z = 3\n").unwrap();

        let record = |p: &str| FileRecord {
            path: PathBuf::from(p),
            language: "python".into(),
            size: 6,
            modified: 0,
            content_hash: String::new(),
            degraded: false,
        };
        let previous: BTreeMap<PathBuf, FileRecord> = ["a.py", "gone.py", "pkg/b.py"]
            .iter()
            .map(|p| (PathBuf::from(p), record(p)))
            .collect();
        let opts = WalkOptions::default();

        let hint = vec![root.join("pkg"), PathBuf::from("gone.py")];
        let (to_read, carry) = plan_paths(root, &opts, Some(&previous), Some(&hint)).unwrap();
        assert_eq!(
            to_read,
            vec![PathBuf::from("gone.py"), PathBuf::from("pkg/b.py"), PathBuf::from("pkg/c.py")]
        );
        assert_eq!(carry.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("a.py")]);
    }

    #[test]
    fn unhinted_plan_enumerates_everything() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(tmp.path().join("b.py"), "y = 1\n").unwrap();
        let (to_read, carry) = plan_paths(tmp.path(), &WalkOptions::default(), None, None).unwrap();
        assert_eq!(to_read.len(), 2);
        assert!(carry.is_empty());
    }
}
