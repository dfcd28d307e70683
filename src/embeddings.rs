//! # Embeddings
//!
//! The [`Embedder`] trait is the boundary to the embedding service: text in,
//! fixed-length L2-normalized vector out. [`SentenceEmbeddingsModel`] is the
//! default implementation, a BERT sentence-transformer run locally with Candle
//! (pure Rust). Weights, tokenizer and config are fetched from the Hugging
//! Face Hub on first use and cached by `hf-hub`.
//!
//! Pooling is the usual sentence-transformers recipe: mean over the token
//! embeddings weighted by the attention mask, followed by L2 normalization.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::error::{RagError, Result};

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Longest token sequence the BERT encoders accept.
const MAX_SEQUENCE_TOKENS: usize = 512;

/// Embedding service contract.
pub trait Embedder: Send + Sync {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    /// Embed one text into a normalized vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, failing on the first error.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

fn embedding_error(e: impl std::fmt::Display) -> RagError {
    RagError::Embedding(e.to_string())
}

/// Sentence embedding model running on the CPU through Candle.
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl SentenceEmbeddingsModel {
    /// Fetch (or reuse from the hub cache) `model_id` and load it.
    ///
    /// # Errors
    /// [`RagError::Embedding`] when the files cannot be fetched or parsed.
    pub fn load(model_id: &str) -> Result<Self> {
        info!("Loading embedding model {}", model_id);
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(embedding_error)?;
        let api_repo = api.repo(repo);

        let config_file = api_repo.get("config.json").map_err(embedding_error)?;
        let tokenizer_file = api_repo.get("tokenizer.json").map_err(embedding_error)?;
        let weights_file = api_repo.get("model.safetensors").map_err(embedding_error)?;

        let raw_config = std::fs::read_to_string(config_file)?;
        let config: Config = serde_json::from_str(&raw_config).map_err(embedding_error)?;
        let dimension = serde_json::from_str::<serde_json::Value>(&raw_config)
            .ok()
            .and_then(|v| v.get("hidden_size").and_then(serde_json::Value::as_u64))
            .ok_or_else(|| embedding_error("config.json has no hidden_size"))?
            as usize;

        let mut tokenizer = Tokenizer::from_file(tokenizer_file).map_err(embedding_error)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..Default::default()
            }))
            .map_err(embedding_error)?;

        // SAFETY: the safetensors file is owned by the hub cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_file], DTYPE, &device)
                .map_err(embedding_error)?
        };
        let model = BertModel::load(vb, &config).map_err(embedding_error)?;

        info!("Embedding model ready ({} dimensions)", dimension);
        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode(&self, text: &str) -> candle_core::Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| candle_core::Error::Msg(format!("tokenization failed: {e}")))?;

        let token_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let hidden = self.model.forward(&token_ids, &token_type_ids, None)?;

        // [1, seq, 1] so the mask broadcasts over the hidden dimension.
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        let pooled = summed.broadcast_div(&counts)?.squeeze(0)?;

        let norm = pooled.sqr()?.sum_all()?.sqrt()?;
        pooled.broadcast_div(&norm)?.to_vec1::<f32>()
    }
}

impl Embedder for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(text).map_err(embedding_error)
    }
}

/// Cosine similarity of two equal-length vectors; `0.0` when either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
