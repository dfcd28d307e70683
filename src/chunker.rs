//! # Chunker
//!
//! Turns files and raw text into overlapping [`Chunk`]s ready for embedding.
//!
//! ## Splitting
//! [`RecursiveTextSplitter`] tries the separators `"\n\n"`, `"\n"`, `" "` and
//! finally `""` (single characters). The first separator present in the text
//! is used to cut it into pieces, each piece keeping its leading separator.
//! Pieces shorter than `chunk_size` are greedily merged; longer ones are split
//! again with the finer separators. When a merged chunk is emitted, up to
//! `chunk_overlap` characters of its trailing pieces are carried into the next
//! chunk. All sizes are measured in characters, and chunks are trimmed.
//!
//! ## Loading
//! Files are dispatched on extension:
//! - `.pdf` → one document per page (`page`, `total_pages`, `file_path` metadata)
//! - `.txt` / `.md` → the whole file as UTF-8 (`file_path` metadata)
//!
//! Anything else is rejected with [`RagError::UnsupportedDocumentType`] before
//! the file is opened.
//!
//! ## Example
//! ```rust
//! use awful_rag::chunker::DocumentProcessor;
//! use awful_rag::document::Metadata;
//!
//! let processor = DocumentProcessor::new(1000, 200).unwrap();
//! let chunks = processor.chunk_text(&"A".repeat(1500), &Metadata::new()).unwrap();
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].source(), Some("Text Input"));
//! ```

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::document::{Chunk, Metadata, merge_metadata, sanitize_metadata};
use crate::error::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TEXT_SOURCE: &str = "Text Input";

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Recursive, separator-aware text splitter with overlap.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveTextSplitter {
    /// # Errors
    /// [`RagError::InvalidConfig`] if `chunk_size` is zero or the overlap is not
    /// smaller than the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
            .into_iter()
            .filter_map(|chunk| {
                let trimmed = chunk.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, &candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge_pieces(&small));
                small.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge_pieces(&small));
        }
        chunks
    }

    /// Greedily merge pieces up to `chunk_size`, carrying up to `chunk_overlap`
    /// characters of tail pieces into the following chunk.
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of {} characters, longer than the configured {}",
                        total, self.chunk_size
                    );
                }
                if !window.is_empty() {
                    if let Some(chunk) = join_trimmed(&window) {
                        merged.push(chunk);
                    }
                    while total > self.chunk_overlap
                        || (total + len > self.chunk_size && total > 0)
                    {
                        let Some((_, front_len)) = window.pop_front() else {
                            break;
                        };
                        total -= front_len;
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if let Some(chunk) = join_trimmed(&window) {
            merged.push(chunk);
        }
        merged
    }
}

fn join_trimmed(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. The empty separator yields single characters.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|piece| !piece.is_empty());
    pieces
}

/// Supported source formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// # Errors
    /// [`RagError::UnsupportedDocumentType`] for anything other than
    /// `.pdf`, `.txt` and `.md`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "txt" | "md" => Ok(DocumentKind::Text),
            "" => Err(RagError::UnsupportedDocumentType(format!(
                "{} has no extension",
                path.display()
            ))),
            other => Err(RagError::UnsupportedDocumentType(format!(".{other}"))),
        }
    }

    fn load(self, path: &Path) -> Result<Vec<LoadedDocument>> {
        match self {
            DocumentKind::Pdf => load_pdf(path),
            DocumentKind::Text => load_text(path),
        }
    }
}

/// One logical document produced by a loader (a PDF page or a whole text file).
#[derive(Debug, Clone)]
struct LoadedDocument {
    text: String,
    metadata: Metadata,
}

fn loader_error(
    path: &Path,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> RagError {
    RagError::Loader {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

fn path_metadata(path: &Path) -> Metadata {
    Metadata::from([(
        "file_path".to_string(),
        Value::String(path.display().to_string()),
    )])
}

fn load_text(path: &Path) -> Result<Vec<LoadedDocument>> {
    let text = fs::read_to_string(path).map_err(|e| loader_error(path, e))?;
    Ok(vec![LoadedDocument {
        text,
        metadata: path_metadata(path),
    }])
}

fn load_pdf(path: &Path) -> Result<Vec<LoadedDocument>> {
    let bytes = fs::read(path).map_err(|e| loader_error(path, e))?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
        .map_err(|e| loader_error(path, e.to_string()))?;
    let total_pages = pages.len();

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(page, text)| {
            let mut metadata = path_metadata(path);
            metadata.insert("page".into(), json!(page));
            metadata.insert("total_pages".into(), json!(total_pages));
            LoadedDocument { text, metadata }
        })
        .collect())
}

/// Loads documents and splits them into chunks with provenance metadata.
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    splitter: RecursiveTextSplitter,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self {
            splitter: RecursiveTextSplitter::new(chunk_size, chunk_overlap)?,
        })
    }

    pub fn splitter(&self) -> &RecursiveTextSplitter {
        &self.splitter
    }

    /// Chunk raw text. `source` defaults to `"Text Input"`; caller metadata is
    /// applied last and wins on collisions.
    pub fn chunk_text(&self, text: &str, metadata: &Metadata) -> Result<Vec<Chunk>> {
        let pieces = self.splitter.split_text(text);
        info!("Created {} chunks from text", pieces.len());

        let source = metadata
            .get("source")
            .cloned()
            .unwrap_or_else(|| Value::String(DEFAULT_TEXT_SOURCE.into()));

        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let position = Metadata::from([("chunk_index".to_string(), json!(index))]);
                let label = Metadata::from([("source".to_string(), source.clone())]);
                let merged = merge_metadata([&position, &label, metadata]);
                Chunk::new(content, sanitize_metadata(merged))
            })
            .collect();

        Ok(chunks)
    }

    /// Load `path` with the loader for its extension and chunk every document
    /// it yields. `chunk_index` counts across all pages of the file.
    ///
    /// # Errors
    /// - [`RagError::UnsupportedDocumentType`] before any I/O for unknown extensions.
    /// - [`RagError::Loader`] when the file cannot be read or parsed.
    pub fn chunk_file(&self, path: &Path, metadata: &Metadata) -> Result<Vec<Chunk>> {
        let documents = DocumentKind::from_path(path)
            .and_then(|kind| kind.load(path))
            .inspect_err(|e| error!("Error processing file {}: {}", path.display(), e))?;
        info!("Loaded {} pages from {}", documents.len(), path.display());

        let source = base_name(path);
        let mut chunks = Vec::new();

        for document in &documents {
            for content in self.splitter.split_text(&document.text) {
                let intrinsic = Metadata::from([
                    ("source".to_string(), Value::String(source.clone())),
                    ("chunk_index".to_string(), json!(chunks.len())),
                ]);
                let merged = merge_metadata([&intrinsic, metadata, &document.metadata]);
                chunks.push(Chunk::new(content, sanitize_metadata(merged)));
            }
        }

        info!("Created {} chunks", chunks.len());
        debug!("Chunked {} into {} pieces", path.display(), chunks.len());
        Ok(chunks)
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self {
            splitter: RecursiveTextSplitter {
                chunk_size: DEFAULT_CHUNK_SIZE,
                chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            },
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
