//! # Prompt templates
//!
//! A template supplies the persona of the assistant and the framing of the
//! grounded question sent with every query:
//! - a `system_prompt` that steers the assistant's behavior,
//! - optional `pre_user_message_content` / `post_user_message_content` strings
//!   placed before and after the generated user turn.
//!
//! Templates are YAML files stored under the application's configuration
//! directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a careful analyst. Always cite your sources."
//! # pre_user_message_content: "Answer in English."
//! # post_user_message_content: "Keep it under 200 words."
//! ```
//!
//! Without a configured template [`PromptTemplate::default`] is used.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{RagError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a Document Analysis Expert who answers questions using the documents in your knowledge base.

Your role:
- Analyze the provided documents with expertise and nuance
- Synthesize information from multiple sources
- Explain complex concepts in accessible terms
- Always cite the specific documents you reference

Response style:
- Professional but approachable
- Analytical and evidence-based
- Clear structure with key insights highlighted

Remember: You analyze and synthesize - don't just quote documents.";

/// Persona and user-turn framing for the conversation engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Sent as the system message of every request.
    pub system_prompt: String,

    /// Extra text added **before** the grounded user turn.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Extra text added **after** the grounded user turn.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            pre_user_message_content: None,
            post_user_message_content: None,
        }
    }
}

impl PromptTemplate {
    /// Build the final user turn: retrieved context, the question and the
    /// instruction to analyze and cite, wrapped in the optional pre/post text.
    pub fn user_message(&self, context: &str, query: &str) -> String {
        let body = format!(
            "Based on the following documents, please analyze and answer the question:\n\n\
             CONTEXT FROM DOCUMENTS:\n{context}\n\n\
             QUESTION: {query}\n\n\
             Please provide a comprehensive analysis referencing the specific documents and sources."
        );

        let mut message = String::new();
        if let Some(pre) = &self.pre_user_message_content {
            message.push_str(pre);
            message.push_str("\n\n");
        }
        message.push_str(&body);
        if let Some(post) = &self.post_user_message_content {
            message.push_str("\n\n");
            message.push_str(post);
        }
        message
    }
}

/// Load a template by name from `<config_dir>/templates/<name>.yaml`.
pub fn load_template(name: &str) -> Result<PromptTemplate> {
    let path = crate::config_dir()?.join(format!("templates/{name}.yaml"));
    load_template_from(&path)
}

/// Load a template from an explicit YAML file.
pub fn load_template_from(path: &Path) -> Result<PromptTemplate> {
    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| {
        RagError::InvalidConfig(format!("template {} is malformed: {e}", path.display()))
    })
}
