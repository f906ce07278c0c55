//! Model registry.
//!
//! Model variants are plain configuration records keyed by identifier.
//! Variants of one family share vocabulary size, context length and prompt
//! templates; they differ in the id the inference server knows them by.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FactoredError;
use crate::prompt::{Bindings, PromptTemplate};

/// Configuration for one model variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Registry identifier (e.g. "llama2-7b-chat-awq").
    pub name: String,
    pub vocab_size: u32,
    /// Maximum number of tokens in prompt plus completion.
    pub context_length: u32,
    /// Template with `{system_message}` and `{prompt}` placeholders.
    pub prompt_template: String,
    /// Template with `{response}` and `{prompt}` placeholders, appended
    /// once per extra exchange in a multi-turn conversation.
    pub continuation_template: String,
    /// Model id sent to the inference server.
    pub engine_model: String,
    #[serde(default)]
    pub quantization: Option<String>,
}

impl ModelConfig {
    /// Render the opening prompt for this model.
    pub fn render_prompt(&self, system_message: &str, prompt: &str) -> Result<String, FactoredError> {
        PromptTemplate::new(self.prompt_template.as_str()).render(
            &Bindings::new()
                .with("system_message", system_message)
                .with("prompt", prompt),
        )
    }

    /// Render one continuation segment for a multi-turn conversation.
    pub fn render_continuation(&self, response: &str, prompt: &str) -> Result<String, FactoredError> {
        PromptTemplate::new(self.continuation_template.as_str()).render(
            &Bindings::new()
                .with("response", response)
                .with("prompt", prompt),
        )
    }

    fn validate(&self) -> Result<(), FactoredError> {
        if self.name.trim().is_empty() {
            return Err(FactoredError::ConfigError(
                "model name cannot be empty".to_string(),
            ));
        }
        if self.vocab_size == 0 || self.context_length == 0 {
            return Err(FactoredError::ConfigError(format!(
                "model '{}' must have positive vocab_size and context_length",
                self.name
            )));
        }
        if self.engine_model.trim().is_empty() {
            return Err(FactoredError::ConfigError(format!(
                "model '{}' has no engine_model",
                self.name
            )));
        }
        Ok(())
    }
}

/// Shared shape of a model family.
struct ModelFamily {
    vocab_size: u32,
    context_length: u32,
    prompt_template: &'static str,
    continuation_template: &'static str,
}

impl ModelFamily {
    fn variant(&self, name: &str, engine_model: &str, quantization: Option<&str>) -> ModelConfig {
        ModelConfig {
            name: name.to_string(),
            vocab_size: self.vocab_size,
            context_length: self.context_length,
            prompt_template: self.prompt_template.to_string(),
            continuation_template: self.continuation_template.to_string(),
            engine_model: engine_model.to_string(),
            quantization: quantization.map(str::to_string),
        }
    }
}

const LLAMA2_CHAT: ModelFamily = ModelFamily {
    vocab_size: 32000,
    context_length: 4096,
    prompt_template: "<s>[INST] <<SYS>>\n{system_message}\n<</SYS>>\n\n{prompt} [/INST] ",
    continuation_template: "{response}</s><s>[INST] {prompt} [/INST] ",
};

/// Name of the model used when none is requested.
pub const DEFAULT_MODEL: &str = "llama2-7b-chat-awq";

/// Lookup table of model variants.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelConfig>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in variants.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for config in [
            LLAMA2_CHAT.variant("llama2-7b-chat-awq", "TheBloke/Llama-2-7b-Chat-AWQ", Some("awq")),
            LLAMA2_CHAT.variant("llama2-13b-chat-awq", "TheBloke/Llama-2-13B-chat-AWQ", Some("awq")),
        ] {
            registry.models.insert(config.name.clone(), config);
        }
        registry
    }

    /// Add a model variant. Names are unique.
    pub fn register(&mut self, config: ModelConfig) -> Result<(), FactoredError> {
        config.validate()?;
        if self.models.contains_key(&config.name) {
            return Err(FactoredError::ConfigError(format!(
                "model '{}' is already registered",
                config.name
            )));
        }
        tracing::debug!(model = %config.name, engine_model = %config.engine_model, "registered model");
        self.models.insert(config.name.clone(), config);
        Ok(())
    }

    /// Look up a model by identifier.
    pub fn get(&self, name: &str) -> Result<&ModelConfig, FactoredError> {
        self.models.get(name).ok_or_else(|| FactoredError::NotFound {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
