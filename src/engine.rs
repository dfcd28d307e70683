//! # Conversation engine
//!
//! Turns a question into a grounded answer:
//!
//! 1. snapshot the most recent turns of the [`Brain`], then remember the question,
//! 2. retrieve the closest chunks through the [`Retriever`],
//! 3. assemble a prompt (system persona, replayed turns, context + question),
//! 4. call the [`ChatModel`] and remember its answer,
//! 5. return a [`ChatResponse`] with trimmed source excerpts.
//!
//! `respond` never fails. Missing documents, an unavailable model and model
//! errors become fixed answers with `status: ok`; anything unexpected becomes
//! a generic apology with `status: error`.
//!
//! The memory mutex is held for the whole call, so concurrent callers are
//! served one at a time and each sees the other's turns in order.

use async_openai::types::chat::Role;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::{ChatModel, SamplingParams};
use crate::brain::{Brain, Memory};
use crate::document::Metadata;
use crate::error::{ModelError, RagError, Result};
use crate::template::PromptTemplate;
use crate::vector_store::{DEFAULT_SEARCH_K, Retriever, SearchResult};

/// Results used to build the prompt context.
pub const CONTEXT_SOURCES: usize = 5;
/// Prior turns replayed into each prompt.
pub const REPLAYED_TURNS: usize = 6;
/// Results echoed back as sources.
pub const RESPONSE_SOURCES: usize = 3;
pub const EXCERPT_CHARS: usize = 300;

pub const NO_DOCUMENTS_MESSAGE: &str = "I don't have relevant documents in my knowledge base. \n\n\
     Please upload documents such as reports, guidelines, or research papers to enable detailed analysis.";
pub const NO_CONTENT_MESSAGE: &str =
    "I found documents but couldn't extract relevant content for analysis.";
pub const NOT_INITIALIZED_MESSAGE: &str =
    "The language model client is not initialized. Please check your API key configuration.";
pub const EMPTY_RESPONSE_MESSAGE: &str =
    "I received an empty response from the AI model. Please try again.";
pub const HIGH_DEMAND_MESSAGE: &str =
    "I'm currently experiencing high demand. Please wait a moment and try again.";
pub const API_CONFIGURATION_MESSAGE: &str =
    "There's an issue with the API configuration. Please check the API key settings.";
pub const GENERIC_ERROR_MESSAGE: &str =
    "I encountered an error while processing your request. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// A retrieved chunk as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceExcerpt {
    /// At most [`EXCERPT_CHARS`] characters, followed by `...` when cut.
    pub content: String,
    pub metadata: Metadata,
    pub relevance_score: f32,
}

impl From<&SearchResult> for SourceExcerpt {
    fn from(result: &SearchResult) -> Self {
        Self {
            content: excerpt(&result.content),
            metadata: result.metadata.clone(),
            relevance_score: result.relevance_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceExcerpt>,
    pub status: ResponseStatus,
    pub model: String,
}

impl ChatResponse {
    fn failed(model: &str) -> Self {
        Self {
            answer: GENERIC_ERROR_MESSAGE.to_string(),
            sources: Vec::new(),
            status: ResponseStatus::Error,
            model: model.to_string(),
        }
    }
}

pub struct ConversationEngine {
    retriever: Arc<dyn Retriever>,
    model: Option<Arc<dyn ChatModel>>,
    model_name: String,
    template: PromptTemplate,
    sampling: SamplingParams,
    brain: Mutex<Brain>,
}

impl ConversationEngine {
    /// `model` is `None` when the model client could not be created; every
    /// answer then short-circuits to [`NOT_INITIALIZED_MESSAGE`]. `model_name`
    /// is reported in that case.
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Option<Arc<dyn ChatModel>>,
        model_name: impl Into<String>,
    ) -> Self {
        let model_name = match &model {
            Some(model) => {
                info!("Successfully initialized model client with {}", model.name());
                model.name().to_string()
            }
            None => {
                let name = model_name.into();
                warn!("Model client for {} not initialized, answers will be placeholders", name);
                name
            }
        };

        Self {
            retriever,
            model,
            model_name,
            template: PromptTemplate::default(),
            sampling: SamplingParams::default(),
            brain: Mutex::new(Brain::default()),
        }
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_available(&self) -> bool {
        self.model.is_some()
    }

    /// Answer `query` from the indexed documents and the recent conversation.
    pub async fn respond(&self, query: &str) -> ChatResponse {
        info!("Processing with {}: {}", self.model_name, query);

        let mut brain = self.brain.lock().await;
        let history = brain.recent(REPLAYED_TURNS);
        brain.add_memory(Memory::new(Role::User, query.to_string()));

        match self.answer(query, history).await {
            Ok((answer, results)) => {
                brain.add_memory(Memory::new(Role::Assistant, answer.clone()));
                ChatResponse {
                    answer,
                    sources: results
                        .iter()
                        .take(RESPONSE_SOURCES)
                        .map(SourceExcerpt::from)
                        .collect(),
                    status: ResponseStatus::Ok,
                    model: self.model_name.clone(),
                }
            }
            Err(e) => {
                error!("Error in chat: {}", e);
                ChatResponse::failed(&self.model_name)
            }
        }
    }

    async fn answer(
        &self,
        query: &str,
        history: Vec<Memory>,
    ) -> Result<(String, Vec<SearchResult>)> {
        let retriever = Arc::clone(&self.retriever);
        let search_query = query.to_string();
        let results =
            tokio::task::spawn_blocking(move || retriever.search(&search_query, DEFAULT_SEARCH_K))
                .await
                .map_err(|e| RagError::Task(format!("retrieval: {e}")))?;

        info!("Found {} relevant sources", results.len());

        let answer = self.generate(query, &results, history).await?;
        Ok((answer, results))
    }

    async fn generate(
        &self,
        query: &str,
        results: &[SearchResult],
        history: Vec<Memory>,
    ) -> Result<String> {
        let Some(model) = &self.model else {
            return Ok(NOT_INITIALIZED_MESSAGE.to_string());
        };
        if results.is_empty() {
            return Ok(NO_DOCUMENTS_MESSAGE.to_string());
        }
        let Some(context) = build_context(results) else {
            return Ok(NO_CONTENT_MESSAGE.to_string());
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Memory::new(Role::System, self.template.system_prompt.clone()));
        messages.extend(history);
        messages.push(Memory::new(Role::User, self.template.user_message(&context, query)));

        let completion = AssertUnwindSafe(model.complete(&messages, &self.sampling))
            .catch_unwind()
            .await
            .map_err(|_| RagError::Task(format!("{} panicked", self.model_name)))?;

        Ok(match completion {
            Ok(choices) => match choices.first().map(|c| c.trim()) {
                Some(answer) if !answer.is_empty() => answer.to_string(),
                _ => EMPTY_RESPONSE_MESSAGE.to_string(),
            },
            Err(err) => {
                error!("Error calling {}: {}", self.model_name, err);
                fallback_message(&err)
            }
        })
    }

    /// Forget the conversation. Idempotent.
    pub async fn clear_memory(&self) {
        self.brain.lock().await.clear();
        info!("Memory cleared for {}", self.model_name);
    }

    pub async fn memory_len(&self) -> usize {
        self.brain.lock().await.len()
    }
}

/// `[Source i - label]: content` per non-empty result, blank-line separated.
/// `None` when every result is empty.
fn build_context(results: &[SearchResult]) -> Option<String> {
    let parts: Vec<String> = results
        .iter()
        .take(CONTEXT_SOURCES)
        .enumerate()
        .filter_map(|(i, result)| {
            let content = result.content.trim();
            if content.is_empty() {
                return None;
            }
            let n = i + 1;
            let label = match result.metadata.get("source") {
                Some(Value::String(source)) => source.clone(),
                Some(other) => other.to_string(),
                None => format!("Document {n}"),
            };
            Some(format!("[Source {n} - {label}]: {content}"))
        })
        .collect();

    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn excerpt(content: &str) -> String {
    match content.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

fn fallback_message(err: &ModelError) -> String {
    match err {
        ModelError::RateLimited(_) => HIGH_DEMAND_MESSAGE.to_string(),
        ModelError::Authentication(_) => API_CONFIGURATION_MESSAGE.to_string(),
        ModelError::Request(reason) => {
            format!("I encountered an error while processing your request: {reason}")
        }
    }
}
