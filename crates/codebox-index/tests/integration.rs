//! Integration tests: build, sync and query real projects on disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codebox_core::{CodeboxConfig, CodeboxError, ProfileName, Result, SearchMode};
use codebox_index::chunk::{CallEdge, ChunkKind};
use codebox_index::{BuildOptions, Embedder, Project, SearchRequest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIMENSION: usize = 64;

/// Deterministic bag-of-words embedder: each lowercase word bumps one
/// coordinate chosen by a stable hash.
#[derive(Default)]
struct HashEmbedder {
    embedded: AtomicUsize,
}

fn word_bucket(word: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % DIMENSION as u64) as usize
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        vector[word_bucket(&word.to_lowercase())] += 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_of_words(text))
    }

    fn native_dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

fn config() -> CodeboxConfig {
    let mut config = CodeboxConfig::default();
    config.embedding.provider = "none".into();
    config.embedding.dimensions = DIMENSION;
    config.embedding.batch_size = 8;
    config.sync.debounce_ms = 50;
    config
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn open_with(root: &Path, embedder: Arc<HashEmbedder>) -> Project {
    Project::open(root, config(), Some(embedder as Arc<dyn Embedder>)).unwrap()
}

/// Chunk ids per file of the current generation.
fn ids_by_file(project: &Project) -> BTreeMap<String, Vec<String>> {
    let store = project.current().unwrap().reader().unwrap();
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for chunk in store.all_chunks().unwrap() {
        out.entry(chunk.file_path.display().to_string())
            .or_default()
            .push(chunk.id);
    }
    for ids in out.values_mut() {
        ids.sort();
    }
    out
}

const FOO_BAR: &str = "def foo(a, b):\n    return a * b\n\n\ndef bar(c):\n    return foo(c, c)\n";

#[tokio::test]
async fn keyword_search_finds_definition_and_call_graph() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    write(
        tmp.path(),
        "b.py",
        "def unrelated():\n    total = 0\n    for i in range(10):\n        total += i\n    return total\n",
    );
    let project = Project::from_config(tmp.path(), config()).unwrap();
    project.build(BuildOptions::default()).await.unwrap();

    let response = project
        .search(SearchRequest::new("foo").with_mode(SearchMode::Keyword))
        .await
        .unwrap();
    let first = &response.results[0];
    assert_eq!(first.payload.name.as_deref(), Some("foo"), "foo should rank first");
    assert!(
        response
            .results
            .iter()
            .all(|r| r.payload.name.as_deref() != Some("unrelated")),
        "unrelated chunk has no 'foo' token"
    );

    let store = project.current().unwrap().reader().unwrap();
    let bar = store
        .all_chunks()
        .unwrap()
        .into_iter()
        .find(|c| c.name.as_deref() == Some("bar"))
        .expect("bar chunk");
    assert_eq!(bar.kind, ChunkKind::Function);
    assert_eq!(
        bar.calls,
        vec![CallEdge {
            callee: "foo".into(),
            line: 6
        }]
    );
}

#[tokio::test]
async fn watcher_addition_rechunks_only_new_file() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "one.py", "def one():\n    return 1\n");
    write(tmp.path(), "two.rs", "pub fn two() -> u32 {\n    2\n}\n");
    write(tmp.path(), "three.go", "package three\n\nfunc Three() int {\n\treturn 3\n}\n");
    let embedder = Arc::new(HashEmbedder::default());
    let project = open_with(tmp.path(), Arc::clone(&embedder));

    let first = project.build(BuildOptions::default()).await.unwrap();
    assert_eq!(first.profile, ProfileName::Medium);
    assert_eq!(first.files_indexed, 3);
    let before = ids_by_file(&project);
    let embedded_before = embedder.embedded.load(Ordering::SeqCst);

    write(tmp.path(), "four.py", "def four():\n    return 4\n");
    let second = project
        .sync_paths(vec![tmp.path().join("four.py")], BuildOptions::default())
        .await
        .unwrap();
    assert!(second.incremental);
    assert_eq!(second.files_rebuilt, 1);
    assert_eq!(second.files_reused, 3);
    assert_eq!(second.files_indexed, 4);
    assert_eq!(second.profile, ProfileName::Medium);

    let after = ids_by_file(&project);
    for (file, ids) in &before {
        assert_eq!(after.get(file), Some(ids), "{file} chunk ids must be unchanged");
    }
    assert!(after.contains_key("four.py"));
    let newly_embedded = embedder.embedded.load(Ordering::SeqCst) - embedded_before;
    assert_eq!(
        newly_embedded,
        after["four.py"].len(),
        "only the new file's chunks are embedded"
    );
}

#[tokio::test]
async fn watcher_picks_up_new_file() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "one.py", "def one():\n    return 1\n");
    let project = Arc::new(open_with(tmp.path(), Arc::new(HashEmbedder::default())));
    let first = project.build(BuildOptions::default()).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = project.watch(cancel.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    write(tmp.path(), "two.py", "def two():\n    return 2\n");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let current = project.current().map(|g| g.id()).unwrap_or(0);
        if current > first.generation_id {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "watcher did not rebuild within the deadline"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(ids_by_file(&project).contains_key("two.py"));

    handle.stop();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn rebuilding_unchanged_tree_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    write(tmp.path(), "lib.rs", "/// Adds.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n");
    let project = open_with(tmp.path(), Arc::new(HashEmbedder::default()));

    project.build(BuildOptions::default()).await.unwrap();
    let first = ids_by_file(&project);
    project.build(BuildOptions::default()).await.unwrap();
    assert_eq!(first, ids_by_file(&project), "full rebuild must produce the same ids");

    let report = project.incremental_sync(BuildOptions::default()).await.unwrap();
    assert_eq!(report.files_rebuilt, 0);
    assert_eq!(report.files_reused, 2);
    assert_eq!(first, ids_by_file(&project));
}

#[tokio::test]
async fn incremental_sync_handles_edit_and_delete() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    write(tmp.path(), "b.py", "def keep():\n    return 0\n");
    write(tmp.path(), "c.py", "def gone():\n    return 0\n");
    let project = open_with(tmp.path(), Arc::new(HashEmbedder::default()));
    project.build(BuildOptions::default()).await.unwrap();
    let before = ids_by_file(&project);

    write(tmp.path(), "a.py", "def foo(a, b):\n    return a + b\n");
    std::fs::remove_file(tmp.path().join("c.py")).unwrap();
    let report = project.incremental_sync(BuildOptions::default()).await.unwrap();

    assert_eq!(report.files_rebuilt, 1);
    assert_eq!(report.files_removed, 1);
    assert_eq!(report.files_failed, 0);
    let after = ids_by_file(&project);
    assert!(!after.contains_key("c.py"));
    assert_eq!(after["b.py"], before["b.py"]);
    assert_ne!(after["a.py"], before["a.py"]);
    assert_eq!(report.embedded_chunks, report.chunks, "every chunk keeps or gets an embedding");
}

#[tokio::test]
async fn malformed_file_falls_back_to_covering_windows() {
    let tmp = TempDir::new().unwrap();
    let broken: String = (1..=95).map(|i| format!("def broken_{i}(:\n")).collect();
    write(tmp.path(), "broken.py", &broken);
    write(tmp.path(), "ok.py", "def fine():\n    return 1\n");
    let project = Project::from_config(tmp.path(), config()).unwrap();
    let report = project.build(BuildOptions::default()).await.unwrap();
    assert_eq!(report.files_degraded, 1);
    assert_eq!(report.files_failed, 0);

    let store = project.current().unwrap().reader().unwrap();
    let mut windows: Vec<_> = store
        .chunks_for_file(Path::new("broken.py"))
        .unwrap()
        .into_iter()
        .map(|c| {
            assert_eq!(c.kind, ChunkKind::FallbackWindow);
            (c.start_line, c.end_line)
        })
        .collect();
    windows.sort();
    assert_eq!(windows.first().map(|w| w.0), Some(1));
    assert_eq!(windows.last().map(|w| w.1), Some(95));
    for pair in windows.windows(2) {
        assert!(pair[1].0 <= pair[0].1 + 1, "windows leave a gap: {pair:?}");
    }
}

#[tokio::test]
async fn hybrid_search_fuses_and_caps() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    write(
        tmp.path(),
        "parse.py",
        "def parse_config(path):\n    return open(path).read()\n\n\ndef parse_args(argv):\n    return argv[1:]\n",
    );
    write(
        tmp.path(),
        "render.rs",
        "pub fn render(config: &str) -> String {\n    config.to_uppercase()\n}\n",
    );
    let project = open_with(tmp.path(), Arc::new(HashEmbedder::default()));
    let report = project.build(BuildOptions::default()).await.unwrap();
    assert_eq!(report.dimension, DIMENSION);
    assert_eq!(report.embedded_chunks, report.chunks);

    let response = project
        .search(SearchRequest::new("parse config").with_limit(2))
        .await
        .unwrap();
    assert_eq!(response.mode, SearchMode::Hybrid);
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.unembedded_chunks, 0);
    assert_eq!(response.results[0].payload.name.as_deref(), Some("parse_config"));
    assert!(response.results[0].vector_rank.is_some());
    assert!(response.results[0].keyword_rank.is_some());
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let python_only = project
        .search(
            SearchRequest::new("config")
                .with_mode(SearchMode::Vector)
                .with_language("python"),
        )
        .await
        .unwrap();
    assert!(python_only
        .results
        .iter()
        .all(|r| r.payload.language == "python"));
}

#[tokio::test]
async fn keyword_mode_works_without_embeddings() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let project = Project::from_config(tmp.path(), config()).unwrap();
    project.build(BuildOptions::default()).await.unwrap();

    let err = project
        .search(SearchRequest::new("foo").with_mode(SearchMode::Hybrid))
        .await
        .unwrap_err();
    assert!(matches!(err, CodeboxError::BackendUnavailable { .. }), "got {err:?}");

    let response = project
        .search(SearchRequest::new("foo").with_mode(SearchMode::Keyword))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.dimension, 0);
}

#[tokio::test]
async fn reader_keeps_old_generation_across_swap() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let project = Project::from_config(tmp.path(), config()).unwrap();
    project.build(BuildOptions::default()).await.unwrap();

    let held = project.current().unwrap();
    let old_path = held.path().to_path_buf();
    let reader = held.reader().unwrap();

    write(tmp.path(), "a.py", "def replaced():\n    return 0\n");
    project.build(BuildOptions::default()).await.unwrap();
    assert_ne!(project.current().unwrap().id(), held.id());

    let old_names: Vec<_> = reader
        .all_chunks()
        .unwrap()
        .into_iter()
        .filter_map(|c| c.name)
        .collect();
    assert!(old_names.contains(&"foo".to_string()), "old snapshot must stay intact");
    assert!(old_path.exists(), "file stays while a reader holds it");

    drop(reader);
    drop(held);
    assert!(!old_path.exists(), "retired generation is removed after the last reader");
}

/// Embedder that never answers in time.
struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(bag_of_words(text))
    }

    fn native_dimension(&self) -> usize {
        DIMENSION
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

fn open_stalled(root: &Path) -> Project {
    Project::open(root, config(), Some(Arc::new(StalledEmbedder) as Arc<dyn Embedder>)).unwrap()
}

#[tokio::test]
async fn timed_out_build_leaves_no_partial_generation() {
    let tmp = TempDir::new().unwrap();
    for i in 0..5 {
        write(tmp.path(), &format!("m{i}.py"), &format!("def f{i}():\n    return {i}\n"));
    }
    let project = open_stalled(tmp.path());
    let options = BuildOptions {
        timeout: Some(Duration::from_millis(300)),
        ..BuildOptions::default()
    };
    let err = project.build(options).await.unwrap_err();
    assert!(matches!(err, CodeboxError::Timeout("build")), "got {err:?}");
    assert!(project.current().is_none());
    assert!(!project.is_building(), "lock is released after a timeout");

    let leftovers: Vec<_> = std::fs::read_dir(project.data_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("gen-"))
        .collect();
    assert!(leftovers.is_empty(), "found {leftovers:?}");
}

#[tokio::test]
async fn cancelled_build_reports_cancellation() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let project = Arc::new(open_stalled(tmp.path()));
    let options = BuildOptions::default();
    let cancel = options.cancel.clone();
    let building = {
        let project = Arc::clone(&project);
        tokio::spawn(async move { project.build(options).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    let busy = project.incremental_sync(BuildOptions::default()).await.unwrap_err();
    assert!(matches!(busy, CodeboxError::BuildInProgress(_)), "got {busy:?}");

    cancel.cancel();
    let err = building.await.unwrap().unwrap_err();
    assert!(matches!(err, CodeboxError::Cancelled("build")), "got {err:?}");
    assert!(project.current().is_none());
}

#[tokio::test]
async fn second_handle_follows_generations_built_elsewhere() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let watcher_side = Project::from_config(tmp.path(), config()).unwrap();
    let first = watcher_side.build(BuildOptions::default()).await.unwrap();
    let first_path = watcher_side.current().unwrap().path().to_path_buf();

    let cli_side = Project::from_config(tmp.path(), config()).unwrap();
    write(tmp.path(), "b.py", "def baz():\n    return 3\n");
    let second = cli_side.build(BuildOptions::default()).await.unwrap();
    assert!(second.generation_id > first.generation_id);
    assert!(!first_path.exists(), "the other handle retired the first generation");

    let response = watcher_side
        .search(SearchRequest::new("baz").with_mode(SearchMode::Keyword))
        .await
        .unwrap();
    assert_eq!(response.generation_id, second.generation_id);
    assert_eq!(response.results[0].payload.name.as_deref(), Some("baz"));
    assert_eq!(watcher_side.stats().unwrap().total_files, 2);

    write(tmp.path(), "c.py", "def qux():\n    return 4\n");
    let third = watcher_side
        .sync_paths(vec!["c.py".into()], BuildOptions::default())
        .await
        .unwrap();
    assert!(third.incremental);
    assert_eq!(third.files_reused, 2);
    assert_eq!(cli_side.stats().unwrap().generation_id, third.generation_id);
}

#[tokio::test]
async fn build_fails_fast_while_another_handle_holds_the_lock() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let project = Project::from_config(tmp.path(), config()).unwrap();

    let other = codebox_index::generation::GenerationDir::new(project.data_dir());
    let held = other.try_lock_builds().unwrap().expect("lock is free");
    let err = project.build(BuildOptions::default()).await.unwrap_err();
    assert!(matches!(err, CodeboxError::BuildInProgress(_)), "got {err:?}");

    drop(held);
    project.build(BuildOptions::default()).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn mostly_unreadable_sync_aborts_and_keeps_generation() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.py", FOO_BAR);
    let project = Project::from_config(tmp.path(), config()).unwrap();
    let first = project.build(BuildOptions::default()).await.unwrap();

    // Self-referencing links fail to read with a loop error.
    let mut hints = vec![std::path::PathBuf::from("a.py")];
    for i in 0..4 {
        let name = format!("loop{i}.py");
        std::os::unix::fs::symlink(&name, tmp.path().join(&name)).unwrap();
        hints.push(name.into());
    }

    let err = project
        .sync_paths(hints, BuildOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, CodeboxError::FailureThreshold { failed: 4, total: 5 }),
        "got {err:?}"
    );
    assert_eq!(project.current().map(|g| g.id()), Some(first.generation_id));
    assert!(!project.is_building());

    let generations: Vec<_> = std::fs::read_dir(project.data_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("gen-"))
        .collect();
    assert_eq!(generations, vec![format!("gen-{:06}.db", first.generation_id)]);

    let response = project
        .search(SearchRequest::new("foo").with_mode(SearchMode::Keyword))
        .await
        .unwrap();
    assert_eq!(response.generation_id, first.generation_id);
}
