//! Index generations on disk and the `CURRENT` pointer.
//!
//! A project's data directory holds one `gen-<id>.db` per generation and a
//! `CURRENT` file naming the generation readers should use. `CURRENT` is
//! replaced by writing a temporary file and renaming it over the old one.
//!
//! A [`Generation`] removes its database file when dropped if it is marked
//! for deletion: freshly built generations are marked until they are
//! installed, retired generations are marked when replaced. Readers hold an
//! `Arc<Generation>`, so a retired file outlives every in-flight query.
//!
//! Several processes may share one data directory. Creating, installing and
//! sweeping generations all happen under [`BuildLock`], an advisory lock on
//! the `build.lock` file that every process takes the same way.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use codebox_core::{CodeboxError, Result};
use fs2::FileExt;

use crate::store::{GenerationStore, IndexMeta};

const CURRENT_FILE: &str = "CURRENT";
const LOCK_FILE: &str = "build.lock";
const GENERATION_PREFIX: &str = "gen-";
const GENERATION_SUFFIX: &str = ".db";

/// The data directory of one project.
///
/// # Examples
///
/// ```
/// use codebox_index::generation::GenerationDir;
///
/// let tmp = tempfile::tempdir().unwrap();
/// let dir = GenerationDir::new(tmp.path());
/// assert_eq!(dir.read_current().unwrap(), None);
/// dir.write_current(4).unwrap();
/// assert_eq!(dir.read_current().unwrap(), Some(4));
/// assert!(dir.file_for(4).ends_with("gen-000004.db"));
/// ```
#[derive(Debug, Clone)]
pub struct GenerationDir {
    dir: PathBuf,
}

impl GenerationDir {
    /// Wrap `dir`; nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory itself.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Database path of generation `id`.
    pub fn file_for(&self, id: u64) -> PathBuf {
        self.dir
            .join(format!("{GENERATION_PREFIX}{id:06}{GENERATION_SUFFIX}"))
    }

    /// Generation named by `CURRENT`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if `CURRENT` exists but is corrupt.
    pub fn read_current(&self) -> Result<Option<u64>> {
        let path = self.dir.join(CURRENT_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        text.trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| CodeboxError::Database(format!("corrupt CURRENT file: '{}'", text.trim())))
    }

    /// Atomically point `CURRENT` at generation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Io`] if the temporary file cannot be written
    /// or renamed.
    pub fn write_current(&self, id: u64) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{CURRENT_FILE}.tmp"));
        std::fs::write(&tmp, format!("{id}\n"))?;
        if let Err(e) = std::fs::rename(&tmp, self.dir.join(CURRENT_FILE)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Ids of every generation file present, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Io`] if the directory cannot be listed.
    pub fn generation_ids(&self) -> Result<Vec<u64>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<u64> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix(GENERATION_PREFIX)?
                    .strip_suffix(GENERATION_SUFFIX)?
                    .parse()
                    .ok()
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// An id greater than every generation seen in this directory.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`GenerationDir::read_current`] and
    /// [`GenerationDir::generation_ids`].
    pub fn next_id(&self) -> Result<u64> {
        let newest_file = self.generation_ids()?.last().copied().unwrap_or(0);
        let current = self.read_current()?.unwrap_or(0);
        Ok(newest_file.max(current) + 1)
    }

    /// Take the build lock without waiting.
    ///
    /// Returns `None` while another handle, in this process or any other,
    /// holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Io`] if the lock file cannot be opened or
    /// locked for a reason other than contention.
    pub fn try_lock_builds(&self) -> Result<Option<BuildLock>> {
        std::fs::create_dir_all(&self.dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(BuildLock { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete generation files other than `keep`, left behind by crashed
    /// builds or unclean shutdowns.
    ///
    /// Requires the build lock: without it, the file of a build running in
    /// another process would look stale.
    pub fn sweep(&self, keep: Option<u64>, _lock: &BuildLock) {
        let Ok(ids) = self.generation_ids() else {
            return;
        };
        for id in ids.into_iter().filter(|id| Some(*id) != keep) {
            let path = self.file_for(id);
            match remove_database(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed stale generation"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove stale generation")
                }
            }
        }
    }
}

/// Exclusive hold on a data directory's `build.lock`; released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(error = %e, "failed to release build lock");
        }
    }
}

/// A sealed, read-only index generation.
pub struct Generation {
    id: u64,
    path: PathBuf,
    meta: IndexMeta,
    delete_on_drop: AtomicBool,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("delete_on_drop", &self.delete_on_drop.load(Ordering::Relaxed))
            .finish()
    }
}

impl Generation {
    /// Open an installed generation. Its file is kept when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if the file cannot be opened or
    /// its metadata is unreadable.
    pub fn open(id: u64, path: PathBuf) -> Result<Self> {
        let meta = GenerationStore::open_read_only(&path)?.read_meta()?;
        Ok(Self {
            id,
            path,
            meta,
            delete_on_drop: AtomicBool::new(false),
        })
    }

    /// Open a freshly sealed generation that is deleted on drop until
    /// [`Generation::keep`] is called.
    pub(crate) fn open_unclaimed(id: u64, path: PathBuf) -> Result<Self> {
        match Self::open(id, path.clone()) {
            Ok(generation) => {
                generation.delete_on_drop.store(true, Ordering::Release);
                Ok(generation)
            }
            Err(e) => {
                let _ = remove_database(&path);
                Err(e)
            }
        }
    }

    /// Generation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build facts recorded in the generation.
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    /// A new read-only connection; one per query.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if the file cannot be opened.
    pub fn reader(&self) -> Result<GenerationStore> {
        GenerationStore::open_read_only(&self.path)
    }

    /// Keep the file when this generation is dropped.
    pub(crate) fn keep(&self) {
        self.delete_on_drop.store(false, Ordering::Release);
    }

    /// Delete the file once the last holder drops this generation.
    pub(crate) fn retire(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        if !self.delete_on_drop.load(Ordering::Acquire) {
            return;
        }
        match remove_database(&self.path) {
            Ok(()) => tracing::debug!(generation = self.id, "removed generation file"),
            Err(e) => tracing::warn!(
                generation = self.id,
                path = %self.path.display(),
                error = %e,
                "failed to remove generation file"
            ),
        }
    }
}

/// A generation being written. Its file is removed unless sealed.
pub(crate) struct PendingGeneration {
    id: u64,
    path: PathBuf,
    store: Option<GenerationStore>,
}

impl PendingGeneration {
    /// Create the database file for generation `id`.
    pub(crate) fn create(dir: &GenerationDir, id: u64) -> Result<Self> {
        let path = dir.file_for(id);
        let store = GenerationStore::create(&path)?;
        Ok(Self {
            id,
            path,
            store: Some(store),
        })
    }

    pub(crate) fn store(&self) -> Result<&GenerationStore> {
        self.store
            .as_ref()
            .ok_or_else(|| CodeboxError::Database("generation already sealed".into()))
    }

    /// Close the writer and open the result as an unclaimed [`Generation`].
    pub(crate) fn seal(mut self) -> Result<Generation> {
        drop(self.store.take());
        let path = std::mem::take(&mut self.path);
        Generation::open_unclaimed(self.id, path)
    }
}

impl Drop for PendingGeneration {
    fn drop(&mut self) {
        drop(self.store.take());
        if self.path.as_os_str().is_empty() {
            return;
        }
        match remove_database(&self.path) {
            Ok(()) => tracing::debug!(generation = self.id, "discarded unfinished generation"),
            Err(e) => tracing::warn!(
                generation = self.id,
                error = %e,
                "failed to discard unfinished generation"
            ),
        }
    }
}

fn remove_database(path: &Path) -> std::io::Result<()> {
    let mut journal = path.as_os_str().to_owned();
    journal.push("-journal");
    let _ = std::fs::remove_file(PathBuf::from(journal));
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::resolve_profile;
    use crate::store::SCHEMA_VERSION;
    use codebox_core::{ProfileConfig, ProfileName};
    use std::sync::Arc;

    fn meta(id: u64) -> IndexMeta {
        IndexMeta {
            generation_id: id,
            schema_version: SCHEMA_VERSION,
            profile: resolve_profile(ProfileName::Medium, 1, 1, &ProfileConfig::default(), 8),
            dimension: 8,
            model: None,
            languages: None,
            created_at: 0,
        }
    }

    fn sealed(dir: &GenerationDir, id: u64) -> Generation {
        let pending = PendingGeneration::create(dir, id).unwrap();
        pending.store().unwrap().write_meta(&meta(id)).unwrap();
        pending.seal().unwrap()
    }

    #[test]
    fn unfinished_generation_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GenerationDir::new(tmp.path());
        let path = dir.file_for(1);
        {
            let _pending = PendingGeneration::create(&dir, 1).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists(), "dropped pending generation must be deleted");
    }

    #[test]
    fn unclaimed_generation_is_removed_unless_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GenerationDir::new(tmp.path());

        let dropped = sealed(&dir, 1);
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());

        let kept = sealed(&dir, 2);
        kept.keep();
        let kept_path = kept.path().to_path_buf();
        drop(kept);
        assert!(kept_path.exists());
        assert_eq!(Generation::open(2, kept_path).unwrap().meta().generation_id, 2);
    }

    #[test]
    fn retired_generation_outlives_its_readers() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GenerationDir::new(tmp.path());
        let generation = Arc::new(sealed(&dir, 1));
        generation.keep();
        let path = generation.path().to_path_buf();

        let reader = Arc::clone(&generation);
        generation.retire();
        drop(generation);
        assert!(path.exists(), "a reader still holds the generation");
        assert_eq!(reader.reader().unwrap().stats().unwrap().total_chunks, 0);
        drop(reader);
        assert!(!path.exists());
    }

    #[test]
    fn next_id_and_sweep() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GenerationDir::new(tmp.path());
        assert_eq!(dir.next_id().unwrap(), 1);
        for id in [1, 3] {
            sealed(&dir, id).keep();
        }
        dir.write_current(3).unwrap();
        assert_eq!(dir.generation_ids().unwrap(), vec![1, 3]);
        assert_eq!(dir.next_id().unwrap(), 4);

        let lock = dir.try_lock_builds().unwrap().unwrap();
        dir.sweep(Some(3), &lock);
        assert_eq!(dir.generation_ids().unwrap(), vec![3]);
    }

    #[test]
    fn build_lock_is_exclusive_across_handles() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = GenerationDir::new(tmp.path());
        let other = GenerationDir::new(tmp.path());

        let held = dir.try_lock_builds().unwrap().expect("first lock");
        assert!(other.try_lock_builds().unwrap().is_none());
        assert!(dir.try_lock_builds().unwrap().is_none(), "not reentrant");
        drop(held);
        assert!(other.try_lock_builds().unwrap().is_some());
        assert_eq!(dir.generation_ids().unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn corrupt_current_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("CURRENT"), "not-a-number").unwrap();
        let err = GenerationDir::new(tmp.path()).read_current().unwrap_err();
        assert!(err.to_string().contains("CURRENT"));
    }
}
