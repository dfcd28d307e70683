//! # Awful RAG (library root)
//!
//! Retrieval-augmented question answering over your own documents:
//! - Document loading and chunking (`chunker`, `document`).
//! - Sentence embeddings and the persistent similarity index (`embeddings`, `vector_store`).
//! - Conversation memory, the model adapter and the answering pipeline (`brain`, `api`, `engine`).
//! - Configuration, prompt templates and the service facade (`config`, `template`, `service`).
//! - CLI parsing (`commands`).
//!
//! ## Pipelines
//! ```text
//! ingest:  file / text -> DocumentProcessor -> VectorStoreManager::add_documents
//! query:   question    -> ConversationEngine -> Retriever::search -> ChatModel::complete
//! ```
//!
//! Everything is wired once by [`service::RagService::from_config`] and passed
//! around by reference; there is no global state besides the tracing subscriber
//! installed by the binary.
//!
//! ## Modules
//! - [`api`], [`brain`], [`chunker`], [`commands`], [`config`], [`document`],
//!   [`embeddings`], [`engine`], [`error`], [`service`], [`template`], [`vector_store`]

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod brain;
pub mod chunker;
pub mod commands;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod service;
pub mod template;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::{RagError, Result};

/// Return the per-platform configuration directory used by Awful RAG.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "arag")`, so you get the right place on each OS
/// (e.g., `~/.config/arag` on Linux).
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns [`RagError::InvalidConfig`] if the platform configuration directory
/// cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "arag").ok_or_else(|| {
        RagError::InvalidConfig("Unable to determine config directory".to_string())
    })?;

    Ok(proj_dirs.config_dir().to_path_buf())
}
