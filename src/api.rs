//! # API Module
//!
//! The boundary to the generative model. [`ChatModel`] is the call contract
//! the [`ConversationEngine`](crate::engine::ConversationEngine) depends on;
//! [`OpenAiChatModel`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint using `async-openai`.
//!
//! Failures are reported as [`ModelError`] so callers can distinguish rate
//! limiting and credential problems from everything else. Nothing here
//! retries on its own.
//!
//! # Example
//!
//! ```no_run
//! use awful_rag::api::{ChatModel, OpenAiChatModel, SamplingParams};
//! use awful_rag::brain::Memory;
//! use awful_rag::config::RagConfig;
//! use async_openai::types::chat::Role;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RagConfig::default();
//! let model = OpenAiChatModel::from_config(&config)?;
//! let messages = vec![Memory::new(Role::User, "Hello!".to_string())];
//! let choices = model.complete(&messages, &SamplingParams::from(&config)).await?;
//! println!("{}", choices[0]);
//! # Ok(()) }
//! ```

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, Role,
    },
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

use crate::brain::Memory;
use crate::config::RagConfig;
use crate::error::{ModelError, RagError, Result};

/// Generation parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 800,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl From<&RagConfig> for SamplingParams {
    fn from(config: &RagConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

/// Generative model contract: ordered messages in, candidate answers out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier reported in responses.
    fn name(&self) -> &str;

    /// Request a completion. The returned list holds one entry per choice and
    /// may be empty.
    async fn complete(
        &self,
        messages: &[Memory],
        sampling: &SamplingParams,
    ) -> std::result::Result<Vec<String>, ModelError>;
}

/// [`ChatModel`] backed by an OpenAI-compatible HTTP API.
pub struct OpenAiChatModel {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatModel {
    /// Create a client for `model` at `api_base`.
    ///
    /// # Errors
    /// [`RagError::ModelUnavailable`] if the key is empty or the HTTP client
    /// cannot be built.
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RagError::ModelUnavailable("no API key configured".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::ModelUnavailable(format!("HTTP client: {e}")))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            model: model.to_string(),
        })
    }

    /// Build from configuration, using `OPENAI_API_KEY` when the file has no key.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| RagError::ModelUnavailable("OPENAI_API_KEY not set".into()))?;

        Self::new(
            &config.api_base,
            &api_key,
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

fn to_request_message(
    memory: &Memory,
) -> std::result::Result<ChatCompletionRequestMessage, OpenAIError> {
    let message = match memory.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(memory.content.clone())
            .build()?
            .into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(memory.content.clone())
            .build()?
            .into(),
        _ => ChatCompletionRequestUserMessageArgs::default()
            .content(memory.content.clone())
            .build()?
            .into(),
    };
    Ok(message)
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    #[allow(deprecated)]
    async fn complete(
        &self,
        messages: &[Memory],
        sampling: &SamplingParams,
    ) -> std::result::Result<Vec<String>, ModelError> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(messages)
            .max_tokens(sampling.max_tokens)
            .temperature(sampling.temperature)
            .top_p(sampling.top_p)
            .build()
            .map_err(|e| ModelError::Request(e.to_string()))?;

        debug!("Sending request: {:?}", request);

        let response = self.client.chat().create(request).await.map_err(|err| {
            error!("Error calling chat completions API: {}", err);
            ModelError::classify(err.to_string())
        })?;

        debug!("Received response: {:?}", response);

        Ok(response
            .choices
            .into_iter()
            .map(|choice| choice.message.content.unwrap_or_default())
            .collect())
    }
}
