//! # VectorStore
//!
//! Persistent, embedding-backed similarity index over document chunks.
//!
//! [`VectorStoreManager`] owns the [`Embedder`] handle and an optional
//! [`VectorIndex`]. The index does not exist until the first successful
//! insertion creates it; a manager opened on a directory without a persisted
//! index stays in that "no index yet" state, which is reported separately from
//! an index that holds zero entries (see [`VectorStoreManager::has_index`]).
//!
//! ## Responsibilities
//! - **Embedding**: every chunk is embedded before the index is touched.
//! - **Indexing**: entries keep their content, metadata and raw vector. Small
//!   indexes are scanned exactly. Past `EXACT_SCAN_LIMIT` entries a HNSW
//!   graph (`hora`) supplies candidates, and every candidate is rescored with
//!   cosine similarity.
//! - **Persistence**: the whole index is written after each mutation.
//!
//! ## On-disk layout
//! ```text
//! <index_path>/index.yaml            manifest (marker): generation, dimension,
//!                                     count, blake3 checksums
//! <index_path>/documents-<gen>.json  id, content and metadata per entry
//! <index_path>/embeddings-<gen>.bin  bincode-encoded vectors, in id order
//! ```
//! A generation is named after the hash of its data, so writing a new one never
//! touches the files the current manifest points at. Data files are written
//! first; renaming the manifest into place is the single commit point. Files of
//! older generations are removed after the commit. A manifest whose checksums
//! do not match is treated as absent.
//!
//! ## Consistency
//! Insertion is buffer-then-commit: embeddings are computed and the next index
//! is built first, then its snapshot is written, and only after the write
//! succeeds is it swapped in. One `RwLock` guards the create-or-append
//! decision, the write and the swap, so concurrent first insertions cannot
//! both create an index.

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::document::{Chunk, Metadata, sanitize_metadata};
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::{RagError, Result};

pub const DEFAULT_SEARCH_K: usize = 5;

/// Indexes up to this size are searched exhaustively.
const EXACT_SCAN_LIMIT: usize = 1024;

const MANIFEST_FILE: &str = "index.yaml";
const DOCUMENTS_PREFIX: &str = "documents-";
const EMBEDDINGS_PREFIX: &str = "embeddings-";
const FORMAT_VERSION: u32 = 2;

/// One hit from a similarity query. Higher `relevance_score` means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub metadata: Metadata,
    pub relevance_score: f32,
}

/// Anything that can answer top-k similarity queries.
///
/// Implementations are fail-soft: a broken backend yields an empty result.
pub trait Retriever: Send + Sync {
    fn search(&self, query: &str, k: usize) -> Vec<SearchResult>;
}

#[derive(Debug, Clone)]
struct IndexEntry {
    id: usize,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct StoredDocumentRef<'a> {
    id: usize,
    content: &'a str,
    metadata: &'a Metadata,
}

#[derive(Deserialize)]
struct StoredDocument {
    id: usize,
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    format_version: u32,
    generation: String,
    dimension: usize,
    count: usize,
    documents_checksum: String,
    embeddings_checksum: String,
}

/// In-memory similarity index: the entries, plus a HNSW graph over them once
/// they outgrow an exact scan.
pub struct VectorIndex {
    graph: Option<HNSWIndex<f32, usize>>,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    fn from_entries(dimension: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        let graph = if entries.len() > EXACT_SCAN_LIMIT {
            Some(build_graph(dimension, &entries)?)
        } else {
            None
        };
        Ok(Self {
            graph,
            dimension,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if k == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<&IndexEntry> = match &self.graph {
            Some(graph) if k < self.entries.len() => graph
                .search(query, k)
                .into_iter()
                .filter_map(|id| self.entries.get(id))
                .collect(),
            _ => self.entries.iter().collect(),
        };

        let mut scored: Vec<(f32, &IndexEntry)> = candidates
            .into_iter()
            .map(|entry| (cosine_similarity(query, &entry.embedding), entry))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(relevance_score, entry)| SearchResult {
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                relevance_score,
            })
            .collect()
    }
}

fn build_graph(dimension: usize, entries: &[IndexEntry]) -> Result<HNSWIndex<f32, usize>> {
    debug!("Building HNSW graph over {} entries", entries.len());
    let mut graph = HNSWIndex::new(dimension, &HNSWParams::<f32>::default());
    for entry in entries {
        graph
            .add(&entry.embedding, entry.id)
            .map_err(|e| RagError::Index(format!("add failed: {e}")))?;
    }
    graph
        .build(Metric::Euclidean)
        .map_err(|e| RagError::Index(format!("build failed: {e}")))?;
    Ok(graph)
}

/// Owner of the embedder and the persistent index.
pub struct VectorStoreManager {
    index_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Option<VectorIndex>>,
}

impl VectorStoreManager {
    /// Open the store at `index_path`, reloading a persisted index when its
    /// manifest is present. Load failures are logged and leave the manager
    /// without an index; they never fail the caller.
    pub fn open(index_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        let index_path = index_path.into();

        let index = match load_snapshot(&index_path, embedder.dimension()) {
            Ok(Some(index)) => {
                info!("Loaded vector store with {} documents", index.len());
                Some(index)
            }
            Ok(None) => {
                info!("No existing vector store found - will create on first document");
                None
            }
            Err(e) => {
                warn!("Error loading vector store, starting without one: {}", e);
                None
            }
        };

        Self {
            index_path,
            embedder,
            index: RwLock::new(index),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// `true` once an index exists (created here or reloaded from disk).
    pub fn has_index(&self) -> bool {
        match self.index.read() {
            Ok(guard) => guard.is_some(),
            Err(_) => {
                error!("Vector index lock poisoned");
                false
            }
        }
    }

    /// Embed, store and persist `chunks`. Returns how many were inserted.
    ///
    /// Blank chunks are skipped and metadata is reduced to scalar values. The
    /// first insertion creates the index. Nothing changes, in memory or on
    /// disk, unless every step succeeds.
    ///
    /// # Errors
    /// - [`RagError::Embedding`] if any chunk fails to embed.
    /// - [`RagError::IndexPersistence`] if the snapshot cannot be written.
    /// - [`RagError::Index`] if the in-memory index rejects the entries.
    pub fn add_documents(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let clean: Vec<Chunk> = chunks
            .into_iter()
            .filter(|chunk| !chunk.is_blank())
            .map(|chunk| Chunk::new(chunk.content, sanitize_metadata(chunk.metadata)))
            .collect();

        if clean.is_empty() {
            info!("No valid documents to add");
            return Ok(0);
        }

        info!("Adding {} clean documents...", clean.len());
        self.insert(clean)
            .inspect_err(|e| error!("Error adding documents: {}", e))
    }

    fn insert(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let dimension = self.embedder.dimension();
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
            return Err(RagError::Embedding(format!(
                "expected {dimension} dimensions, got {}",
                bad.len()
            )));
        }

        let mut guard = self.index.write().map_err(|_| lock_poisoned())?;

        let mut entries = guard
            .as_ref()
            .map_or_else(Vec::new, |index| index.entries.clone());
        let first_id = entries.len();
        let inserted = chunks.len();
        entries.extend(chunks.into_iter().zip(embeddings).enumerate().map(
            |(offset, (chunk, embedding))| IndexEntry {
                id: first_id + offset,
                content: chunk.content,
                metadata: chunk.metadata,
                embedding,
            },
        ));

        let next = VectorIndex::from_entries(dimension, entries)?;
        write_snapshot(&self.index_path, dimension, &next.entries)?;

        if guard.is_some() {
            debug!("Adding to existing vector store...");
        } else {
            info!("Creating new vector store...");
        }
        *guard = Some(next);

        info!("Successfully added {} documents to vector store", inserted);
        Ok(inserted)
    }

    /// Top-`k` most similar chunks, best first. Never fails: a missing index
    /// gives `[]` and errors are logged and mapped to `[]`.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchResult> {
        match self.try_search(query, k) {
            Ok(results) => {
                debug!(
                    "Found {} results for query: {}...",
                    results.len(),
                    query.chars().take(50).collect::<String>()
                );
                results
            }
            Err(e) => {
                error!("Error searching: {}", e);
                Vec::new()
            }
        }
    }

    /// Like [`search`](Self::search) but reports failures.
    pub fn try_search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let guard = self.index.read().map_err(|_| lock_poisoned())?;
        let Some(index) = guard.as_ref() else {
            debug!("Vector store not initialized - no documents added yet");
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query)?;
        if vector.len() != index.dimension() {
            return Err(RagError::Embedding(format!(
                "query has {} dimensions, index has {}",
                vector.len(),
                index.dimension()
            )));
        }
        Ok(index.search(&vector, k))
    }

    /// Number of stored entries; `0` without an index or on error.
    pub fn count(&self) -> usize {
        match self.index.read() {
            Ok(guard) => guard.as_ref().map_or(0, VectorIndex::len),
            Err(_) => {
                error!("Error getting document count: vector index lock poisoned");
                0
            }
        }
    }

    /// Write the current index to disk. Without an index this does nothing.
    pub fn save(&self) -> Result<()> {
        let guard = self.index.read().map_err(|_| lock_poisoned())?;
        match guard.as_ref() {
            Some(index) => {
                write_snapshot(&self.index_path, index.dimension(), &index.entries)?;
                info!("Vector store saved successfully");
            }
            None => debug!("Nothing to save - no vector store yet"),
        }
        Ok(())
    }

    /// Delete the persisted index and return to the "no index yet" state.
    ///
    /// # Errors
    /// [`RagError::IndexPersistence`] if the directory cannot be removed; the
    /// in-memory index is kept in that case.
    pub fn clear_all(&self) -> Result<()> {
        let mut guard = self.index.write().map_err(|_| lock_poisoned())?;

        if self.index_path.exists() {
            fs::remove_dir_all(&self.index_path).map_err(|e| RagError::IndexPersistence {
                path: self.index_path.clone(),
                reason: e.to_string(),
            })?;
        }
        *guard = None;

        info!("All documents cleared from vector store");
        Ok(())
    }
}

impl Retriever for VectorStoreManager {
    fn search(&self, query: &str, k: usize) -> Vec<SearchResult> {
        VectorStoreManager::search(self, query, k)
    }
}

fn lock_poisoned() -> RagError {
    RagError::Index("vector index lock poisoned".into())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}

fn documents_file(generation: &str) -> String {
    format!("{DOCUMENTS_PREFIX}{generation}.json")
}

fn embeddings_file(generation: &str) -> String {
    format!("{EMBEDDINGS_PREFIX}{generation}.bin")
}

/// Serialized form of an index, ready to be written.
struct EncodedSnapshot {
    manifest: IndexManifest,
    documents: Vec<u8>,
    embeddings: Vec<u8>,
}

fn encode_snapshot(dimension: usize, entries: &[IndexEntry]) -> Result<EncodedSnapshot> {
    let documents: Vec<StoredDocumentRef> = entries
        .iter()
        .map(|entry| StoredDocumentRef {
            id: entry.id,
            content: &entry.content,
            metadata: &entry.metadata,
        })
        .collect();
    let vectors: Vec<&[f32]> = entries.iter().map(|entry| entry.embedding.as_slice()).collect();

    let documents = serde_json::to_vec(&documents)
        .map_err(|e| RagError::Index(format!("cannot encode documents: {e}")))?;
    let embeddings = bincode::serde::encode_to_vec(&vectors, bincode::config::standard())
        .map_err(|e| RagError::Index(format!("cannot encode embeddings: {e}")))?;

    let documents_checksum = blake3::hash(&documents).to_hex().to_string();
    let embeddings_checksum = blake3::hash(&embeddings).to_hex().to_string();
    let mut hasher = blake3::Hasher::new();
    hasher.update(documents_checksum.as_bytes());
    hasher.update(embeddings_checksum.as_bytes());
    let generation = hasher.finalize().to_hex()[..16].to_string();

    Ok(EncodedSnapshot {
        manifest: IndexManifest {
            format_version: FORMAT_VERSION,
            generation,
            dimension,
            count: entries.len(),
            documents_checksum,
            embeddings_checksum,
        },
        documents,
        embeddings,
    })
}

fn write_snapshot(dir: &Path, dimension: usize, entries: &[IndexEntry]) -> Result<()> {
    let failure = |reason: String| RagError::IndexPersistence {
        path: dir.to_path_buf(),
        reason,
    };

    let snapshot = encode_snapshot(dimension, entries).map_err(|e| failure(e.to_string()))?;
    let generation = &snapshot.manifest.generation;
    let manifest_yaml =
        serde_yaml::to_string(&snapshot.manifest).map_err(|e| failure(e.to_string()))?;

    fs::create_dir_all(dir).map_err(|e| failure(e.to_string()))?;
    write_atomic(dir, &documents_file(generation), &snapshot.documents)
        .map_err(|e| failure(e.to_string()))?;
    write_atomic(dir, &embeddings_file(generation), &snapshot.embeddings)
        .map_err(|e| failure(e.to_string()))?;
    // commit
    write_atomic(dir, MANIFEST_FILE, manifest_yaml.as_bytes())
        .map_err(|e| failure(e.to_string()))?;

    remove_stale_generations(dir, generation);
    debug!("Persisted {} entries to {} ({})", entries.len(), dir.display(), generation);
    Ok(())
}

/// Delete data files of every generation except `current`. Leftovers only cost
/// disk space, so failures are logged and ignored.
fn remove_stale_generations(dir: &Path, current: &str) {
    let keep = [documents_file(current), embeddings_file(current)];
    let listing = match fs::read_dir(dir) {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Cannot list {} for cleanup: {}", dir.display(), e);
            return;
        }
    };

    for entry in listing.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_data =
            name.starts_with(DOCUMENTS_PREFIX) || name.starts_with(EMBEDDINGS_PREFIX);
        if is_data && !keep.contains(&name) {
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("Cannot remove stale index file {}: {}", name, e);
            }
        }
    }
}

/// `Ok(None)` when no manifest exists; `Err` when one exists but cannot be used.
fn load_snapshot(dir: &Path, dimension: usize) -> Result<Option<VectorIndex>> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(None);
    }

    info!("Loading existing vector store...");
    let manifest: IndexManifest = serde_yaml::from_str(&fs::read_to_string(&manifest_path)?)
        .map_err(|e| RagError::Index(format!("unreadable manifest: {e}")))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(RagError::Index(format!(
            "unsupported index format version {}",
            manifest.format_version
        )));
    }
    if manifest.generation.is_empty()
        || !manifest.generation.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(RagError::Index(format!(
            "invalid generation {:?}",
            manifest.generation
        )));
    }
    if manifest.dimension != dimension {
        return Err(RagError::Index(format!(
            "index has {} dimensions but the embedder produces {}",
            manifest.dimension, dimension
        )));
    }

    let documents_bytes = fs::read(dir.join(documents_file(&manifest.generation)))?;
    let embeddings_bytes = fs::read(dir.join(embeddings_file(&manifest.generation)))?;

    if blake3::hash(&documents_bytes).to_hex().as_str() != manifest.documents_checksum
        || blake3::hash(&embeddings_bytes).to_hex().as_str() != manifest.embeddings_checksum
    {
        return Err(RagError::Index("checksum mismatch".into()));
    }

    let documents: Vec<StoredDocument> = serde_json::from_slice(&documents_bytes)
        .map_err(|e| RagError::Index(format!("unreadable documents: {e}")))?;
    let (vectors, _): (Vec<Vec<f32>>, usize) =
        bincode::serde::decode_from_slice(&embeddings_bytes, bincode::config::standard())
            .map_err(|e| RagError::Index(format!("unreadable embeddings: {e}")))?;

    if documents.len() != manifest.count || vectors.len() != manifest.count {
        return Err(RagError::Index(format!(
            "manifest lists {} entries, found {} documents and {} vectors",
            manifest.count,
            documents.len(),
            vectors.len()
        )));
    }

    let mut entries = Vec::with_capacity(documents.len());
    for (position, (document, embedding)) in documents.into_iter().zip(vectors).enumerate() {
        if document.id != position || embedding.len() != dimension {
            return Err(RagError::Index(format!("malformed entry at position {position}")));
        }
        entries.push(IndexEntry {
            id: document.id,
            content: document.content,
            metadata: document.metadata,
            embedding,
        });
    }

    VectorIndex::from_entries(dimension, entries).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, KeywordEmbedder};
    use serde_json::json;
    use tempfile::TempDir;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(KeywordEmbedder::new(&[
            "rust", "ownership", "borrowing", "python", "garbage", "bread", "flour", "oven",
        ]))
    }

    fn chunk(content: &str, source: &str) -> Chunk {
        Chunk::new(
            content,
            Metadata::from([("source".to_string(), json!(source))]),
        )
    }

    fn manifest(path: &Path) -> IndexManifest {
        serde_yaml::from_str(&fs::read_to_string(path.join(MANIFEST_FILE)).unwrap()).unwrap()
    }

    fn data_files(path: &Path) -> usize {
        fs::read_dir(path)
            .unwrap()
            .flatten()
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with(DOCUMENTS_PREFIX) || name.starts_with(EMBEDDINGS_PREFIX)
            })
            .count()
    }

    fn sample_chunks() -> Vec<Chunk> {
        vec![
            chunk("Rust ownership and borrowing rules", "rust.md"),
            chunk("Python garbage collection", "python.md"),
            chunk("Bread needs flour and a hot oven", "bread.md"),
        ]
    }

    #[test]
    fn test_search_without_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());

        assert!(!store.has_index());
        assert_eq!(store.count(), 0);
        assert!(store.search("rust", 5).is_empty());
    }

    #[test]
    fn test_add_empty_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let store = VectorStoreManager::open(&path, embedder());

        assert_eq!(store.add_documents(Vec::new()).unwrap(), 0);
        assert!(!store.has_index());
        assert_eq!(store.count(), 0);
        assert!(!path.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_blank_chunks_are_filtered() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());

        let inserted = store
            .add_documents(vec![chunk("   ", "a"), chunk("\n\t", "b")])
            .unwrap();
        assert_eq!(inserted, 0);
        assert!(!store.has_index());

        let inserted = store
            .add_documents(vec![chunk(" ", "a"), chunk("rust", "b")])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_non_scalar_metadata_is_dropped() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());

        let metadata = Metadata::from([
            ("source".to_string(), json!("a.md")),
            ("tags".to_string(), json!(["x", "y"])),
        ]);
        store.add_documents(vec![Chunk::new("rust", metadata)]).unwrap();

        let results = store.search("rust", 1);
        assert_eq!(results[0].metadata.len(), 1);
        assert_eq!(results[0].metadata["source"], json!("a.md"));
    }

    #[test]
    fn test_add_then_search_orders_by_relevance() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());

        assert_eq!(store.add_documents(sample_chunks()).unwrap(), 3);
        assert!(store.has_index());
        assert_eq!(store.count(), 3);
        assert!(store.index.read().unwrap().as_ref().unwrap().graph.is_none());

        let results = store.search("rust borrowing", 10);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].metadata["source"], json!("rust.md"));
        for pair in results.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }

        let top = store.search("flour oven", 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].content, "Bread needs flour and a hot oven");
        assert!(store.search("rust", 0).is_empty());
    }

    #[test]
    fn test_incremental_add_appends() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());

        store.add_documents(sample_chunks()).unwrap();
        store
            .add_documents(vec![chunk("More about rust ownership", "rust2.md")])
            .unwrap();

        assert_eq!(store.count(), 4);
        let results = store.search("rust ownership", 2);
        assert_eq!(results.len(), 2);
        let sources: Vec<_> = results.iter().map(|r| r.metadata["source"].clone()).collect();
        assert!(sources.contains(&json!("rust2.md")));
        assert!(sources.contains(&json!("rust.md")));
    }

    #[test]
    fn test_persisted_index_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");

        let before = {
            let store = VectorStoreManager::open(&path, embedder());
            store.add_documents(sample_chunks()).unwrap();
            store.search("python garbage", 3)
        };
        assert!(path.join(MANIFEST_FILE).is_file());

        let reopened = VectorStoreManager::open(&path, embedder());
        assert!(reopened.has_index());
        assert_eq!(reopened.count(), 3);
        assert_eq!(reopened.search("python garbage", 3), before);

        reopened
            .add_documents(vec![chunk("rust again", "more.md")])
            .unwrap();
        assert_eq!(VectorStoreManager::open(&path, embedder()).count(), 4);
        // one documents file and one embeddings file, older generations are gone
        assert_eq!(data_files(&path), 2);
    }

    #[test]
    fn test_failed_append_keeps_last_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let embedder = embedder();
        let store = VectorStoreManager::open(&path, embedder.clone());
        store
            .add_documents(sample_chunks().into_iter().take(2).collect())
            .unwrap();
        let committed = manifest(&path).generation;

        // occupy the embeddings file name the append is about to write
        let extra = chunk("rust again", "more.md");
        let mut entries = store.index.read().unwrap().as_ref().unwrap().entries.clone();
        entries.push(IndexEntry {
            id: 2,
            content: extra.content.clone(),
            metadata: extra.metadata.clone(),
            embedding: embedder.embed(&extra.content).unwrap(),
        });
        let next = encode_snapshot(embedder.dimension(), &entries).unwrap();
        let blocker = path.join(embeddings_file(&next.manifest.generation));
        fs::create_dir(&blocker).unwrap();

        let err = store.add_documents(vec![extra.clone()]).unwrap_err();
        assert!(matches!(err, RagError::IndexPersistence { .. }));
        assert_eq!(store.count(), 2);
        assert_eq!(manifest(&path).generation, committed);

        let reopened = VectorStoreManager::open(&path, embedder.clone());
        assert!(reopened.has_index());
        assert_eq!(reopened.count(), 2);

        fs::remove_dir(&blocker).unwrap();
        store.add_documents(vec![extra]).unwrap();
        assert_eq!(manifest(&path).generation, next.manifest.generation);
        assert_eq!(VectorStoreManager::open(&path, embedder).count(), 3);
        assert_eq!(data_files(&path), 2);
    }

    #[test]
    fn test_clear_all_resets_to_no_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let store = VectorStoreManager::open(&path, embedder());
        store.add_documents(sample_chunks()).unwrap();

        store.clear_all().unwrap();

        assert!(!store.has_index());
        assert_eq!(store.count(), 0);
        assert!(store.search("rust", 5).is_empty());
        assert!(!path.exists());
        assert!(!VectorStoreManager::open(&path, embedder()).has_index());

        // clearing twice is fine, and the next insert recreates the index
        store.clear_all().unwrap();
        store.add_documents(vec![chunk("rust", "a.md")]).unwrap();
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_corrupt_manifest_loads_as_no_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MANIFEST_FILE), "format_version: [not, a, number").unwrap();

        let store = VectorStoreManager::open(&path, embedder());
        assert!(!store.has_index());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_tampered_documents_load_as_no_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        VectorStoreManager::open(&path, embedder())
            .add_documents(sample_chunks())
            .unwrap();

        fs::write(path.join(documents_file(&manifest(&path).generation)), "[]").unwrap();

        let store = VectorStoreManager::open(&path, embedder());
        assert!(!store.has_index());
    }

    #[test]
    fn test_dimension_change_loads_as_no_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        VectorStoreManager::open(&path, embedder())
            .add_documents(sample_chunks())
            .unwrap();

        let other: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(&["only"]));
        assert!(!VectorStoreManager::open(&path, other).has_index());
    }

    #[test]
    fn test_embedding_failure_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let store = VectorStoreManager::open(&path, Arc::new(FailingEmbedder::on("boom", 4)));

        store.add_documents(vec![chunk("fine", "a.md")]).unwrap();
        let err = store
            .add_documents(vec![chunk("also fine", "b.md"), chunk("boom", "c.md")])
            .unwrap_err();

        assert!(matches!(err, RagError::Embedding(_)));
        assert_eq!(store.count(), 1);
        let reopened = VectorStoreManager::open(&path, Arc::new(FailingEmbedder::on("boom", 4)));
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn test_persistence_failure_does_not_create_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-dir");
        fs::write(&path, "occupied").unwrap();

        let store = VectorStoreManager::open(&path, embedder());
        let err = store.add_documents(sample_chunks()).unwrap_err();

        assert!(matches!(err, RagError::IndexPersistence { .. }));
        assert!(!store.has_index());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_search_failure_is_soft() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(
            dir.path().join("db"),
            Arc::new(FailingEmbedder::on("boom", 4)),
        );
        store.add_documents(vec![chunk("fine", "a.md")]).unwrap();

        assert!(store.search("boom", 5).is_empty());
        assert!(store.try_search("boom", 5).is_err());
        assert_eq!(store.search("fine", 5).len(), 1);
    }

    #[test]
    fn test_save_without_index_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let store = VectorStoreManager::open(&path, embedder());

        store.save().unwrap();
        assert!(!path.exists());

        store.add_documents(sample_chunks()).unwrap();
        fs::remove_file(path.join(MANIFEST_FILE)).unwrap();
        store.save().unwrap();
        assert_eq!(VectorStoreManager::open(&path, embedder()).count(), 3);
    }

    #[test]
    fn test_large_index_uses_graph_and_stays_sorted() {
        let dir = TempDir::new().unwrap();
        let store = VectorStoreManager::open(dir.path().join("db"), embedder());
        let words = [
            "rust", "ownership", "borrowing", "python", "garbage", "bread", "flour", "oven",
        ];

        let chunks: Vec<Chunk> = (0..EXACT_SCAN_LIMIT + 100)
            .map(|i| {
                let first = words[i % words.len()];
                let second = words[(i / 3) % words.len()];
                let text = format!("{first} {second} entry{i}");
                chunk(&text, &format!("doc{i}"))
            })
            .collect();
        store.add_documents(chunks).unwrap();
        assert_eq!(store.count(), EXACT_SCAN_LIMIT + 100);
        assert!(store.index.read().unwrap().as_ref().unwrap().graph.is_some());

        let results = store.search("rust ownership", 5);
        assert!(!results.is_empty() && results.len() <= 5);
        for pair in results.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
    }
}
