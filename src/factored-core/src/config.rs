//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::debate::DEFAULT_JUDGE_SYSTEM_MESSAGE;
use crate::engine::SamplingParams;
use crate::error::FactoredError;
use crate::model::{DEFAULT_MODEL, ModelConfig, ModelRegistry};
use crate::recipe::DEFAULT_QA_SYSTEM_MESSAGE;

/// Root configuration structure. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub sampling: SamplingParams,
    pub defaults: DefaultsConfig,
    pub prompts: PromptsConfig,
    /// Extra model variants registered on top of the built-ins.
    pub models: Vec<ModelConfig>,
}

/// Which server route generations go through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Raw prompt completion (`/completions`).
    #[default]
    Completion,
    /// Chat completion (`/chat/completions`).
    Chat,
}

impl Backend {
    pub fn parse(name: &str) -> Result<Self, FactoredError> {
        match name.to_lowercase().as_str() {
            "completion" | "completions" => Ok(Backend::Completion),
            "chat" => Ok(Backend::Chat),
            other => Err(FactoredError::ConfigError(format!(
                "unknown backend '{other}' (expected 'completion' or 'chat')"
            ))),
        }
    }
}

/// Connection settings for the inference server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backend: Backend,
    pub api_base: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Completion,
            api_base: "http://localhost:8000/v1".to_string(),
            api_key: String::new(),
            timeout_secs: 120,
        }
    }
}

/// Defaults used when the CLI does not override them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub model: String,
    pub debate_rounds: u32,
    pub improve_rounds: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            debate_rounds: 3,
            improve_rounds: 3,
        }
    }
}

/// System prompt overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub qa_system_message: String,
    pub judge_system_message: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            qa_system_message: DEFAULT_QA_SYSTEM_MESSAGE.to_string(),
            judge_system_message: DEFAULT_JUDGE_SYSTEM_MESSAGE.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FactoredError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| FactoredError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, FactoredError> {
        toml::from_str(content)
            .map_err(|e| FactoredError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Build the model registry: built-ins plus any `[[models]]` entries.
    pub fn registry(&self) -> Result<ModelRegistry, FactoredError> {
        let mut registry = ModelRegistry::builtin();
        for model in &self.models {
            registry.register(model.clone())?;
        }
        Ok(registry)
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.engine.backend, Backend::Completion);
        assert_eq!(config.engine.api_base, "http://localhost:8000/v1");
        assert_eq!(config.defaults.model, DEFAULT_MODEL);
        assert_eq!(config.defaults.debate_rounds, 3);
        assert_eq!(config.sampling, SamplingParams::default());
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_str(
            r#"
            [engine]
            backend = "chat"
            api_base = "https://api.example.com/v1"

            [sampling]
            max_tokens = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.backend, Backend::Chat);
        assert_eq!(config.engine.timeout_secs, 120);
        assert_eq!(config.sampling.max_tokens, 64);
        assert_eq!(config.sampling.top_p, 1.0);
    }

    #[test]
    fn test_extra_models_registered() {
        let config = Config::from_str(
            r#"
            [[models]]
            name = "mistral-7b-instruct"
            vocab_size = 32000
            context_length = 8192
            prompt_template = "<s>[INST] {system_message}\n\n{prompt} [/INST]"
            continuation_template = "{response}</s>[INST] {prompt} [/INST]"
            engine_model = "mistralai/Mistral-7B-Instruct-v0.2"
            "#,
        )
        .unwrap();

        let registry = config.registry().unwrap();
        let model = registry.get("mistral-7b-instruct").unwrap();
        assert_eq!(model.context_length, 8192);
        assert!(model.quantization.is_none());
        assert!(registry.get(DEFAULT_MODEL).is_ok());
    }

    #[test]
    fn test_duplicate_model_in_config_fails() {
        let config = Config::from_str(&format!(
            r#"
            [[models]]
            name = "{DEFAULT_MODEL}"
            vocab_size = 1
            context_length = 1
            prompt_template = "{{prompt}}"
            continuation_template = "{{prompt}}"
            engine_model = "x"
            "#
        ))
        .unwrap();
        assert!(matches!(config.registry(), Err(FactoredError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::from_str("[engine]\nbackend = \"grpc\"").is_err());
        assert!(Backend::parse("grpc").is_err());
        assert_eq!(Backend::parse("Chat").unwrap(), Backend::Chat);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[defaults]\ndebate_rounds = 5").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.defaults.debate_rounds, 5);
        assert_eq!(config.defaults.improve_rounds, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/factored.toml");
        assert!(matches!(result, Err(FactoredError::ConfigError(_))));
    }
}
