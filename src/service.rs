//! # Service facade
//!
//! [`RagService`] is the surface the CLI (or any other transport) talks to. It
//! owns one [`DocumentProcessor`], one [`VectorStoreManager`] and one
//! [`ConversationEngine`] whose retriever is that same manager.
//!
//! Ingestion errors are returned to the caller. Queries always produce a
//! [`ChatResponse`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::api::{ChatModel, OpenAiChatModel, SamplingParams};
use crate::chunker::DocumentProcessor;
use crate::config::RagConfig;
use crate::document::Metadata;
use crate::embeddings::{Embedder, SentenceEmbeddingsModel};
use crate::engine::{ChatResponse, ConversationEngine};
use crate::error::Result;
use crate::template::{PromptTemplate, load_template};
use crate::vector_store::VectorStoreManager;

/// Liveness summary of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub index_present: bool,
    pub document_count: usize,
}

pub struct RagService {
    processor: DocumentProcessor,
    store: Arc<VectorStoreManager>,
    engine: ConversationEngine,
}

impl RagService {
    pub fn new(
        processor: DocumentProcessor,
        store: Arc<VectorStoreManager>,
        engine: ConversationEngine,
    ) -> Self {
        Self {
            processor,
            store,
            engine,
        }
    }

    /// Wire every component from `config`.
    ///
    /// A missing API key does not fail construction; the engine then answers
    /// every question with a fixed "not initialized" message.
    ///
    /// # Errors
    /// Invalid configuration, an embedding model that cannot be loaded, or a
    /// configured template that cannot be read.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        config.validate()?;

        let processor = DocumentProcessor::new(config.chunk_size, config.chunk_overlap)?;

        let embedder: Arc<dyn Embedder> =
            Arc::new(SentenceEmbeddingsModel::load(&config.embedding_model)?);
        let store = Arc::new(VectorStoreManager::open(&config.index_path, embedder));

        let model: Option<Arc<dyn ChatModel>> = match OpenAiChatModel::from_config(config) {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                error!("Failed to initialize model client: {}", e);
                None
            }
        };

        let template = match &config.template {
            Some(name) => load_template(name)?,
            None => PromptTemplate::default(),
        };

        let engine = ConversationEngine::new(store.clone(), model, config.model.as_str())
            .with_template(template)
            .with_sampling(SamplingParams::from(config));

        Ok(Self::new(processor, store, engine))
    }

    /// Load, chunk and index a file. Returns the number of chunks stored.
    pub fn ingest_file(&self, path: &Path, metadata: &Metadata) -> Result<usize> {
        info!("Processing file: {}", path.display());
        let chunks = self.processor.chunk_file(path, metadata)?;
        let stored = self.store.add_documents(chunks)?;
        info!("Stored {} chunks from {}", stored, path.display());
        Ok(stored)
    }

    /// Chunk and index raw text. Returns the number of chunks stored.
    pub fn ingest_text(&self, text: &str, metadata: &Metadata) -> Result<usize> {
        let chunks = self.processor.chunk_text(text, metadata)?;
        self.store.add_documents(chunks)
    }

    pub async fn query(&self, question: &str) -> ChatResponse {
        self.engine.respond(question).await
    }

    pub async fn clear_memory(&self) {
        self.engine.clear_memory().await;
    }

    pub fn health(&self) -> Health {
        Health {
            index_present: self.store.has_index(),
            document_count: self.store.count(),
        }
    }

    /// Delete every indexed document.
    pub fn clear_index(&self) -> Result<()> {
        self.store.clear_all()
    }

    pub fn model_name(&self) -> &str {
        self.engine.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NO_DOCUMENTS_MESSAGE, ResponseStatus};
    use crate::error::RagError;
    use crate::testing::{KeywordEmbedder, ScriptedModel};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn service(dir: &TempDir, model: Arc<ScriptedModel>) -> RagService {
        let embedder: Arc<dyn Embedder> =
            Arc::new(KeywordEmbedder::new(&["rust", "memory", "bread", "oven"]));
        let store = Arc::new(VectorStoreManager::open(dir.path().join("db"), embedder));
        let engine = ConversationEngine::new(store.clone(), Some(model as Arc<dyn ChatModel>), "m");
        RagService::new(DocumentProcessor::new(100, 20).unwrap(), store, engine)
    }

    #[tokio::test]
    async fn test_ingest_then_query() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new());
        let rag = service(&dir, model.clone());

        assert_eq!(
            rag.health(),
            Health {
                index_present: false,
                document_count: 0
            }
        );
        assert_eq!(rag.query("rust?").await.answer, NO_DOCUMENTS_MESSAGE);

        let stored = rag
            .ingest_text("Rust manages memory without a garbage collector.", &Metadata::new())
            .unwrap();
        assert_eq!(stored, 1);

        let file = dir.path().join("bread.md");
        fs::write(&file, "Bread bakes in a hot oven.").unwrap();
        let metadata = Metadata::from([("author".to_string(), json!("kim"))]);
        assert_eq!(rag.ingest_file(&file, &metadata).unwrap(), 1);

        assert_eq!(
            rag.health(),
            Health {
                index_present: true,
                document_count: 2
            }
        );

        let response = rag.query("How does rust handle memory?").await;
        assert_eq!(response.status, ResponseStatus::Ok);
        assert_eq!(response.answer, "answer 1");
        assert_eq!(response.sources[0].metadata["source"], json!("Text Input"));
        assert_eq!(response.sources[1].metadata["source"], json!("bread.md"));
        assert_eq!(response.sources[1].metadata["author"], json!("kim"));
    }

    #[tokio::test]
    async fn test_clear_index_returns_to_empty() {
        let dir = TempDir::new().unwrap();
        let rag = service(&dir, Arc::new(ScriptedModel::new()));

        rag.ingest_text("rust memory", &Metadata::new()).unwrap();
        rag.clear_index().unwrap();

        assert!(!rag.health().index_present);
        assert_eq!(rag.query("rust").await.answer, NO_DOCUMENTS_MESSAGE);
    }

    #[test]
    fn test_unsupported_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let rag = service(&dir, Arc::new(ScriptedModel::new()));

        let err = rag
            .ingest_file(Path::new("slides.pptx"), &Metadata::new())
            .unwrap_err();

        assert!(matches!(err, RagError::UnsupportedDocumentType(_)));
        assert_eq!(rag.health().document_count, 0);
    }

    #[test]
    fn test_whitespace_text_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let rag = service(&dir, Arc::new(ScriptedModel::new()));

        assert_eq!(rag.ingest_text("   \n\n  ", &Metadata::new()).unwrap(), 0);
        assert!(!rag.health().index_present);
    }
}
