//! SQLite + FTS5 storage for one index generation.
//!
//! Every generation lives in its own database file. Chunks are rows with
//! JSON-encoded metadata columns and a BLOB embedding; FTS5 mirrors the
//! searchable text columns through an insert trigger. Cosine similarity is
//! computed in Rust for vector search.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use codebox_core::{CodeboxError, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkKind};
use crate::profile::ResolvedProfile;

/// Version of the on-disk layout written by this crate.
pub const SCHEMA_VERSION: u32 = 1;

/// BM25 column weights: name, signature, full_path, docstring, content.
const BM25_RANK: &str = "bm25(chunks_fts, 10.0, 5.0, 3.0, 1.0, 1.0)";

const CHUNK_COLUMNS: &str = "c.id, c.file_path, c.language, c.kind, c.name, c.full_path, \
     c.parent_id, c.depth, c.start_line, c.end_line, c.signature, c.parameters, \
     c.return_type, c.docstring, c.decorators, c.imports, c.calls, c.content, \
     c.content_hash, c.file_hash, c.embedding";

/// A source file recorded in a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// Language id.
    pub language: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, unix seconds.
    pub modified: u64,
    /// SHA-256 of the file content.
    pub content_hash: String,
    /// Whether the file fell back to line windows after a parse failure.
    pub degraded: bool,
}

/// Facts about a generation written once at build time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    /// Generation id, monotonically increasing per project.
    pub generation_id: u64,
    /// Layout version, see [`SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Profile the chunks were built with.
    pub profile: ResolvedProfile,
    /// Stored vector dimension; 0 when embeddings are disabled.
    pub dimension: usize,
    /// Embedding model, absent when embeddings are disabled.
    pub model: Option<String>,
    /// Language filter the generation was built with.
    pub languages: Option<Vec<String>>,
    /// Build completion time, unix seconds.
    pub created_at: u64,
}

/// A chunk id with its score in one ranked list.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedId {
    /// Chunk id.
    pub id: String,
    /// Cosine similarity or BM25 magnitude.
    pub score: f64,
}

/// Row counts and breakdowns of one generation.
///
/// # Examples
///
/// ```
/// use codebox_index::store::GenerationStore;
///
/// let store = GenerationStore::in_memory().unwrap();
/// let stats = store.stats().unwrap();
/// assert_eq!(stats.total_chunks, 0);
/// assert!(stats.languages.is_empty());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of chunks.
    pub total_chunks: usize,
    /// Number of files.
    pub total_files: usize,
    /// Chunks carrying an embedding.
    pub embedded_chunks: usize,
    /// Files that fell back to line windows after a parse failure.
    pub degraded_files: usize,
    /// Chunk count per language id.
    pub languages: BTreeMap<String, usize>,
    /// Chunk count per chunk kind.
    pub kinds: BTreeMap<String, usize>,
    /// Size of the database in bytes.
    pub index_size_bytes: u64,
}

/// Connection to one generation database.
///
/// # Examples
///
/// ```
/// use codebox_index::store::GenerationStore;
///
/// let store = GenerationStore::in_memory().unwrap();
/// assert!(store.keyword_search("anything", None, 5).unwrap().is_empty());
/// ```
pub struct GenerationStore {
    conn: Connection,
}

impl std::fmt::Debug for GenerationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl GenerationStore {
    /// Create a fresh database at `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if the file already exists or the
    /// schema cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(CodeboxError::Database(format!(
                "generation file already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CodeboxError::Database(format!("failed to create index directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CodeboxError::Database(format!("failed to open database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a sealed generation read-only.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if the file cannot be opened.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            CodeboxError::Database(format!("failed to open {}: {e}", path.display()))
        })?;
        Ok(Self { conn })
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CodeboxError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS files (
                    path TEXT PRIMARY KEY,
                    language TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    modified INTEGER NOT NULL,
                    content_hash TEXT NOT NULL,
                    degraded INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    file_path TEXT NOT NULL,
                    language TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    name TEXT,
                    full_path TEXT NOT NULL,
                    parent_id TEXT,
                    depth INTEGER NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    signature TEXT,
                    parameters TEXT NOT NULL,
                    return_type TEXT,
                    docstring TEXT,
                    decorators TEXT NOT NULL,
                    imports TEXT NOT NULL,
                    calls TEXT NOT NULL,
                    content TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    file_hash TEXT NOT NULL,
                    embedding BLOB,
                    FOREIGN KEY (file_path) REFERENCES files(path)
                );

                CREATE INDEX IF NOT EXISTS chunks_file ON chunks(file_path, start_line);
                CREATE INDEX IF NOT EXISTS chunks_language ON chunks(language);

                CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                    name, signature, full_path, docstring, content,
                    content='chunks', content_rowid='seq'
                );

                CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                    INSERT INTO chunks_fts(rowid, name, signature, full_path, docstring, content)
                    VALUES (new.seq, new.name, new.signature, new.full_path, new.docstring, new.content);
                END;
                ",
            )
            .map_err(|e| CodeboxError::Database(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    /// Record the generation's build facts.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on write failure.
    pub fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        let value = serde_json::to_string(meta)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES ('index', ?1)",
                params![value],
            )
            .map_err(|e| CodeboxError::Database(format!("failed to write index metadata: {e}")))?;
        Ok(())
    }

    /// Read the generation's build facts.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] if the metadata row is missing or
    /// unreadable.
    pub fn read_meta(&self) -> Result<IndexMeta> {
        let value: String = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = 'index'", [], |row| {
                row.get(0)
            })
            .map_err(|e| CodeboxError::Database(format!("failed to read index metadata: {e}")))?;
        let meta: IndexMeta = serde_json::from_str(&value)?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(CodeboxError::Database(format!(
                "index schema version {} is not supported (expected {SCHEMA_VERSION}); re-index to rebuild",
                meta.schema_version
            )));
        }
        Ok(meta)
    }

    /// Insert files and their chunks in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on insert failure; nothing from the
    /// batch is kept.
    pub fn insert_batch(&self, files: &[FileRecord], chunks: &[Chunk]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| CodeboxError::Database(format!("failed to begin transaction: {e}")))?;
        {
            let mut file_stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO files (path, language, size, modified, content_hash, degraded)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| CodeboxError::Database(format!("failed to prepare insert: {e}")))?;
            for file in files {
                file_stmt
                    .execute(params![
                        file.path.to_string_lossy(),
                        file.language,
                        file.size as i64,
                        file.modified as i64,
                        file.content_hash,
                        file.degraded,
                    ])
                    .map_err(|e| CodeboxError::Database(format!("failed to record file: {e}")))?;
            }

            let mut chunk_stmt = tx
                .prepare_cached(
                    "INSERT INTO chunks
                     (id, file_path, language, kind, name, full_path, parent_id, depth,
                      start_line, end_line, signature, parameters, return_type, docstring,
                      decorators, imports, calls, content, content_hash, file_hash, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                             ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                )
                .map_err(|e| CodeboxError::Database(format!("failed to prepare insert: {e}")))?;
            for chunk in chunks {
                chunk_stmt
                    .execute(params![
                        chunk.id,
                        chunk.file_path.to_string_lossy(),
                        chunk.language,
                        chunk.kind.as_str(),
                        chunk.name,
                        chunk.full_path,
                        chunk.parent_id,
                        chunk.depth,
                        chunk.start_line,
                        chunk.end_line,
                        chunk.signature,
                        serde_json::to_string(&chunk.parameters)?,
                        chunk.return_type,
                        chunk.docstring,
                        serde_json::to_string(&chunk.decorators)?,
                        serde_json::to_string(&chunk.imports)?,
                        serde_json::to_string(&chunk.calls)?,
                        chunk.content,
                        chunk.content_hash,
                        chunk.file_hash,
                        chunk.embedding.as_deref().map(floats_to_bytes),
                    ])
                    .map_err(|e| {
                        CodeboxError::Database(format!("failed to insert chunk {}: {e}", chunk.id))
                    })?;
            }
        }
        tx.commit()
            .map_err(|e| CodeboxError::Database(format!("failed to commit batch: {e}")))?;
        Ok(())
    }

    /// Every recorded file, sorted by path.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT path, language, size, modified, content_hash, degraded
                 FROM files ORDER BY path",
            )
            .map_err(|e| CodeboxError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileRecord {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    language: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    modified: row.get::<_, i64>(3)? as u64,
                    content_hash: row.get(4)?,
                    degraded: row.get(5)?,
                })
            })
            .map_err(|e| CodeboxError::Database(format!("failed to query files: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CodeboxError::Database(format!("failed to read row: {e}")))
    }

    /// Chunks of one file, embeddings included, ordered by position.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn chunks_for_file(&self, file_path: &Path) -> Result<Vec<Chunk>> {
        self.query_chunks(
            &format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.file_path = ?1
                 ORDER BY c.start_line, c.depth, c.seq"
            ),
            params![file_path.to_string_lossy()],
        )
    }

    /// Every chunk, ordered by file and position.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        self.query_chunks(
            &format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c
                 ORDER BY c.file_path, c.start_line, c.depth, c.seq"
            ),
            [],
        )
    }

    /// Chunks with the given ids, keyed by id. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn chunks_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Chunk>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.id = ?1");
        let mut stmt = self
            .conn
            .prepare_cached(&sql)
            .map_err(|e| CodeboxError::Database(format!("failed to prepare query: {e}")))?;
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt
                .query_map(params![id], row_to_chunk)
                .map_err(|e| CodeboxError::Database(format!("failed to query chunk: {e}")))?;
            if let Some(row) = rows.next() {
                let chunk =
                    row.map_err(|e| CodeboxError::Database(format!("failed to read row: {e}")))?;
                found.insert(chunk.id.clone(), chunk);
            }
        }
        Ok(found)
    }

    fn query_chunks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Chunk>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| CodeboxError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_chunk)
            .map_err(|e| CodeboxError::Database(format!("failed to query chunks: {e}")))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CodeboxError::Database(format!("failed to read row: {e}")))
    }

    /// Rank embedded chunks by cosine similarity to `query`.
    ///
    /// Stored vectors longer than the query are cut to its length and
    /// renormalized, so a smaller-dimension query ranks over the same
    /// prefix. Chunks without embeddings never appear. Ties are broken by id.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use codebox_index::store::GenerationStore;
    ///
    /// let store = GenerationStore::in_memory().unwrap();
    /// assert!(store.vector_search(&[0.1, 0.2], None, 5).unwrap().is_empty());
    /// ```
    pub fn vector_search(
        &self,
        query: &[f32],
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RankedId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, embedding FROM chunks
                 WHERE embedding IS NOT NULL AND (?1 IS NULL OR language = ?1)",
            )
            .map_err(|e| CodeboxError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![language], |row| {
                let id: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((id, bytes))
            })
            .map_err(|e| CodeboxError::Database(format!("failed to query chunks: {e}")))?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, bytes) =
                row.map_err(|e| CodeboxError::Database(format!("failed to read row: {e}")))?;
            let stored = bytes_to_floats(&bytes);
            if stored.len() < query.len() {
                continue;
            }
            let score = cosine_similarity(query, &stored[..query.len()]);
            scored.push(RankedId { id, score });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Rank chunks by weighted BM25 over the FTS5 index.
    ///
    /// Names weigh most, then signatures, dotted paths, docstrings and
    /// content. The score is the BM25 magnitude.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn keyword_search(
        &self,
        query: &str,
        language: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RankedId>> {
        let safe_query = sanitize_fts_query(query);
        if safe_query.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT c.id, {BM25_RANK} AS score
             FROM chunks_fts
             JOIN chunks c ON c.seq = chunks_fts.rowid
             WHERE chunks_fts MATCH ?1 AND (?2 IS NULL OR c.language = ?2)
             ORDER BY score, c.id
             LIMIT ?3"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| CodeboxError::Database(format!("failed to prepare FTS query: {e}")))?;

        let rows = stmt
            .query_map(params![safe_query, language, limit as i64], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // bm25() is negative; more negative is more relevant
                Ok(RankedId {
                    id,
                    score: (-rank).max(0.0),
                })
            })
            .map_err(|e| CodeboxError::Database(format!("FTS query failed: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| CodeboxError::Database(format!("failed to read FTS row: {e}")))
    }

    /// Number of chunks without an embedding, optionally for one language.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn count_unembedded(&self, language: Option<&str>) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunks
                 WHERE embedding IS NULL AND (?1 IS NULL OR language = ?1)",
                params![language],
                |row| row.get(0),
            )
            .map_err(|e| CodeboxError::Database(format!("failed to count chunks: {e}")))?;
        Ok(count as usize)
    }

    /// Row counts and breakdowns.
    ///
    /// # Errors
    ///
    /// Returns [`CodeboxError::Database`] on query failure.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            self.conn
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .map_err(|e| CodeboxError::Database(format!("failed to count rows: {e}")))
        };
        let total_chunks = count("SELECT COUNT(*) FROM chunks")?;
        let total_files = count("SELECT COUNT(*) FROM files")?;
        let embedded_chunks = count("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")?;
        let degraded_files = count("SELECT COUNT(*) FROM files WHERE degraded != 0")?;

        let languages = self.breakdown("SELECT language, COUNT(*) FROM chunks GROUP BY language")?;
        let kinds = self.breakdown("SELECT kind, COUNT(*) FROM chunks GROUP BY kind")?;

        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(StoreStats {
            total_chunks,
            total_files,
            embedded_chunks,
            degraded_files,
            languages,
            kinds,
            index_size_bytes: (page_count * page_size) as u64,
        })
    }

    fn breakdown(&self, sql: &str) -> Result<BTreeMap<String, usize>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| CodeboxError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .map_err(|e| CodeboxError::Database(format!("failed to query breakdown: {e}")))?;
        rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(|e| CodeboxError::Database(format!("failed to read row: {e}")))
    }
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let kind: String = row.get(3)?;
    let kind = ChunkKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown chunk kind '{kind}'").into(),
        )
    })?;
    let embedding: Option<Vec<u8>> = row.get(20)?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: PathBuf::from(row.get::<_, String>(1)?),
        language: row.get(2)?,
        kind,
        name: row.get(4)?,
        full_path: row.get(5)?,
        parent_id: row.get(6)?,
        depth: row.get(7)?,
        start_line: row.get(8)?,
        end_line: row.get(9)?,
        signature: row.get(10)?,
        parameters: json_column(row, 11)?,
        return_type: row.get(12)?,
        docstring: row.get(13)?,
        decorators: json_column(row, 14)?,
        imports: json_column(row, 15)?,
        calls: json_column(row, 16)?,
        content: row.get(17)?,
        content_hash: row.get(18)?,
        file_hash: row.get(19)?,
        embedding: embedding.map(|bytes| bytes_to_floats(&bytes)),
    })
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity; 0 for empty, mismatched or zero vectors.
///
/// # Examples
///
/// ```
/// use codebox_index::store::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-9);
/// assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// Turn free text into an FTS5 OR-query of quoted terms.
///
/// Characters other than alphanumerics and `_` are dropped, so FTS5 syntax
/// in the input is never interpreted.
///
/// # Examples
///
/// ```
/// use codebox_index::store::sanitize_fts_query;
///
/// assert_eq!(sanitize_fts_query("parse* json"), "\"parse\" OR \"json\"");
/// assert_eq!(sanitize_fts_query("()"), "");
/// ```
pub fn sanitize_fts_query(query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            let clean: String = w
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect();
    words.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CallEdge;
    use codebox_core::{ProfileConfig, ProfileName};

    fn sample_chunk(path: &str, name: &str, content: &str, embedding: Option<Vec<f32>>) -> Chunk {
        let mut chunk = Chunk::new(Path::new(path), "rust", ChunkKind::Function, content, 1, 5)
            .with_name(name, &format!("src.main.{name}"));
        chunk.signature = Some(format!("fn {name}()"));
        chunk.embedding = embedding;
        chunk
    }

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            language: "rust".into(),
            size: 10,
            modified: 0,
            content_hash: format!("hash-{path}"),
            degraded: false,
        }
    }

    #[test]
    fn chunk_survives_storage_with_metadata() {
        let store = GenerationStore::in_memory().unwrap();
        let mut chunk = sample_chunk("src/main.rs", "main", "fn main() { run(); }", Some(vec![0.6, 0.8]));
        chunk.calls = vec![CallEdge {
            callee: "run".into(),
            line: 1,
        }];
        chunk.imports = vec!["use std::io;".into()];
        store.insert_batch(&[file("src/main.rs")], &[chunk.clone()]).unwrap();

        let loaded = store.chunks_for_file(Path::new("src/main.rs")).unwrap();
        assert_eq!(loaded, vec![chunk]);
    }

    #[test]
    fn vector_search_finds_similar() {
        let store = GenerationStore::in_memory().unwrap();
        let auth = sample_chunk("src/main.rs", "auth", "fn authenticate() {}", Some(vec![1.0, 0.0, 0.0]));
        let parse = sample_chunk("src/main.rs", "parse", "fn parse_json() {}", Some(vec![0.0, 1.0, 0.0]));
        let bare = sample_chunk("src/main.rs", "bare", "fn bare() {}", None);
        store
            .insert_batch(&[file("src/main.rs")], &[auth.clone(), parse, bare])
            .unwrap();

        let results = store.vector_search(&[0.9, 0.1, 0.0], None, 5).unwrap();
        assert_eq!(results.len(), 2, "unembedded chunks never rank");
        assert_eq!(results[0].id, auth.id);
        assert_eq!(store.count_unembedded(None).unwrap(), 1);
    }

    #[test]
    fn shorter_query_ranks_over_stored_prefix() {
        let store = GenerationStore::in_memory().unwrap();
        let a = sample_chunk("src/main.rs", "a", "fn a() {}", Some(vec![1.0, 0.0, 5.0]));
        let b = sample_chunk("src/main.rs", "b", "fn b() {}", Some(vec![0.0, 1.0, 0.0]));
        store.insert_batch(&[file("src/main.rs")], &[a.clone(), b]).unwrap();

        let results = store.vector_search(&[1.0, 0.0], None, 5).unwrap();
        assert_eq!(results[0].id, a.id);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn keyword_search_prefers_names() {
        let store = GenerationStore::in_memory().unwrap();
        let payment = sample_chunk("src/main.rs", "process_payment", "fn process_payment(amount: f64) {}", None);
        let caller = sample_chunk("src/main.rs", "checkout", "fn checkout() { process_payment(1.0) }", None);
        store
            .insert_batch(&[file("src/main.rs")], &[caller, payment.clone()])
            .unwrap();

        let results = store.keyword_search("process_payment", None, 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, payment.id);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn language_filter_applies_before_ranking() {
        let store = GenerationStore::in_memory().unwrap();
        let rust = sample_chunk("src/main.rs", "render", "fn render() {}", Some(vec![1.0, 0.0]));
        let mut py = sample_chunk("app.py", "render", "def render(): pass", Some(vec![1.0, 0.0]));
        py.language = "python".into();
        let mut py_file = file("app.py");
        py_file.language = "python".into();
        store
            .insert_batch(&[file("src/main.rs"), py_file], &[rust, py.clone()])
            .unwrap();

        let keyword = store.keyword_search("render", Some("python"), 1).unwrap();
        assert_eq!(keyword.len(), 1);
        assert_eq!(keyword[0].id, py.id);
        let vector = store.vector_search(&[1.0, 0.0], Some("python"), 10).unwrap();
        assert_eq!(vector.len(), 1);
        assert_eq!(vector[0].id, py.id);
    }

    #[test]
    fn stats_break_down_by_language_and_kind() {
        let store = GenerationStore::in_memory().unwrap();
        let a = sample_chunk("src/main.rs", "a", "fn a() {}", Some(vec![1.0]));
        let b = sample_chunk("src/other.rs", "b", "fn b() {}", None);
        let mut degraded = file("src/other.rs");
        degraded.degraded = true;
        store
            .insert_batch(&[file("src/main.rs"), degraded], &[a, b])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.embedded_chunks, 1);
        assert_eq!(stats.degraded_files, 1);
        assert_eq!(stats.languages.get("rust"), Some(&2));
        assert_eq!(stats.kinds.get("function"), Some(&2));
    }

    #[test]
    fn meta_round_trips_and_checks_schema() {
        let store = GenerationStore::in_memory().unwrap();
        let profile = crate::profile::resolve_profile(
            ProfileName::Medium,
            1,
            1,
            &ProfileConfig::default(),
            8,
        );
        let mut meta = IndexMeta {
            generation_id: 3,
            schema_version: SCHEMA_VERSION,
            profile,
            dimension: 8,
            model: Some("fake".into()),
            languages: None,
            created_at: 1,
        };
        store.write_meta(&meta).unwrap();
        assert_eq!(store.read_meta().unwrap(), meta);

        meta.schema_version = SCHEMA_VERSION + 1;
        store.write_meta(&meta).unwrap();
        assert!(store.read_meta().unwrap_err().to_string().contains("schema"));
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen-1.db");
        GenerationStore::create(&path).unwrap();
        assert!(GenerationStore::create(&path).is_err());
        let read = GenerationStore::open_read_only(&path).unwrap();
        assert_eq!(read.stats().unwrap().total_chunks, 0);
    }

    #[test]
    fn cosine_similarity_correct() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn fts_syntax_is_neutralized() {
        assert_eq!(sanitize_fts_query("foo AND bar"), "\"foo\" OR \"AND\" OR \"bar\"");
        assert_eq!(sanitize_fts_query("NEAR(\"a\" b)"), "\"NEARa\" OR \"b\"");
    }
}
