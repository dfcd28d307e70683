//! Deterministic stand-ins for the embedding service, the retriever and the
//! language model.

use async_openai::types::chat::Role;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::api::{ChatModel, SamplingParams};
use crate::brain::Memory;
use crate::embeddings::Embedder;
use crate::error::{ModelError, RagError, Result};
use crate::vector_store::{Retriever, SearchResult};

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedder: one axis per vocabulary word plus a shared axis for
/// everything else, L2-normalized.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension()];
        for word in words(text) {
            let axis = self
                .vocabulary
                .iter()
                .position(|v| *v == word)
                .unwrap_or(self.vocabulary.len());
            vector[axis] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }
}

/// Embeds every text as the same unit vector, except texts containing the
/// trigger, which fail.
pub struct FailingEmbedder {
    trigger: String,
    dimension: usize,
}

impl FailingEmbedder {
    pub fn on(trigger: &str, dimension: usize) -> Self {
        Self {
            trigger: trigger.to_string(),
            dimension,
        }
    }
}

impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(&self.trigger) {
            return Err(RagError::Embedding(format!("refusing to embed {text:?}")));
        }
        let mut vector = vec![0f32; self.dimension];
        vector[0] = 1.0;
        Ok(vector)
    }
}

/// Returns the same results for every query and records the queries.
pub struct FixedRetriever {
    results: Vec<SearchResult>,
    pub queries: Mutex<Vec<(String, usize)>>,
}

impl FixedRetriever {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl Retriever for FixedRetriever {
    fn search(&self, query: &str, k: usize) -> Vec<SearchResult> {
        self.queries.lock().unwrap().push((query.to_string(), k));
        self.results.iter().take(k).cloned().collect()
    }
}

/// Replays queued replies, then answers `"answer N"` for the N-th call.
/// Every request is recorded.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<std::result::Result<Vec<String>, ModelError>>>,
    pub requests: Mutex<Vec<Vec<Memory>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(replies: Vec<std::result::Result<Vec<String>, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Vec<Memory> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted-model"
    }

    async fn complete(
        &self,
        messages: &[Memory],
        _sampling: &SamplingParams,
    ) -> std::result::Result<Vec<String>, ModelError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(messages.to_vec());
            requests.len()
        };
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(vec![format!("answer {call}")]),
        }
    }
}

pub fn count_role(messages: &[Memory], role: Role) -> usize {
    messages.iter().filter(|m| m.role == role).count()
}
