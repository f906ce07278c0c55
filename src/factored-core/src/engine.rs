//! Inference engine seam.
//!
//! The harness never runs a model itself. Every generation is a single
//! text-in/text-out call to an OpenAI-compatible server, either through the
//! raw `/completions` route or through chat completions.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Backend, EngineConfig};
use crate::error::FactoredError;
use crate::model::ModelConfig;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 256,
        }
    }
}

/// Generated text plus the log probability of its first token.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText {
    pub text: String,
    pub first_token_logprob: Option<f64>,
}

/// A text generation backend.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Generate a completion for an already-rendered prompt.
    async fn generate(
        &self,
        model: &ModelConfig,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, FactoredError>;

    /// Like `generate`, but also asks the server for token log probabilities.
    async fn generate_scored(
        &self,
        _model: &ModelConfig,
        _prompt: &str,
        _params: &SamplingParams,
    ) -> Result<ScoredText, FactoredError> {
        Err(FactoredError::InferenceError(
            "backend does not report log probabilities".to_string(),
        ))
    }
}

/// Build the engine selected by the configuration.
pub fn connect(config: &EngineConfig) -> Result<Box<dyn InferenceEngine>, FactoredError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let engine: Box<dyn InferenceEngine> = match config.backend {
        Backend::Completion => Box::new(CompletionEngine::new(
            &config.api_base,
            &config.api_key,
            timeout,
        )?),
        Backend::Chat => Box::new(ChatEngine::new(&config.api_base, &config.api_key, timeout)?),
    };
    Ok(engine)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, FactoredError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    logprobs: Option<CompletionLogprobs>,
}

#[derive(Debug, Deserialize)]
struct CompletionLogprobs {
    #[serde(default)]
    token_logprobs: Vec<Option<f64>>,
}

impl CompletionResponse {
    fn into_scored(self) -> Result<ScoredText, FactoredError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FactoredError::InferenceError("completion returned no text".to_string()))?;
        let text = choice
            .text
            .ok_or_else(|| FactoredError::InferenceError("completion returned no text".to_string()))?;
        let first_token_logprob = choice
            .logprobs
            .and_then(|lp| lp.token_logprobs.into_iter().next().flatten());
        Ok(ScoredText {
            text,
            first_token_logprob,
        })
    }

    fn into_text(self) -> Result<String, FactoredError> {
        self.into_scored().map(|scored| scored.text)
    }
}

/// Raw prompt completion over `POST {api_base}/completions`.
pub struct CompletionEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CompletionEngine {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, FactoredError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: format!("{}/completions", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(
        &self,
        model: &ModelConfig,
        prompt: &str,
        params: &SamplingParams,
        logprobs: Option<u32>,
    ) -> Result<CompletionResponse, FactoredError> {
        let body = CompletionRequest {
            model: &model.engine_model,
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            logprobs,
        };
        debug!(endpoint = %self.endpoint, model = %model.engine_model, prompt_len = prompt.len(), "completion request");

        let mut request = self.client.post(&self.endpoint).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(FactoredError::InferenceError(format!(
                "completion API returned {status}: {text}"
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl InferenceEngine for CompletionEngine {
    async fn generate(
        &self,
        model: &ModelConfig,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, FactoredError> {
        self.complete(model, prompt, params, None).await?.into_text()
    }

    async fn generate_scored(
        &self,
        model: &ModelConfig,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<ScoredText, FactoredError> {
        self.complete(model, prompt, params, Some(1)).await?.into_scored()
    }
}

/// Chat completion through async-openai; the rendered prompt is sent as a
/// single user message.
pub struct ChatEngine {
    client: Client<OpenAIConfig>,
}

impl ChatEngine {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, FactoredError> {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        let client = Client::with_config(config).with_http_client(http_client(timeout)?);
        Ok(Self { client })
    }
}

#[async_trait]
impl InferenceEngine for ChatEngine {
    async fn generate(
        &self,
        model: &ModelConfig,
        prompt: &str,
        params: &SamplingParams,
    ) -> Result<String, FactoredError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&model.engine_model)
            .max_completion_tokens(params.max_tokens)
            .temperature(params.temperature)
            .top_p(params.top_p)
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.to_string().into(),
                    name: None,
                },
            )])
            .build()?;
        debug!(model = %model.engine_model, prompt_len = prompt.len(), "chat request");

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| FactoredError::InferenceError("chat completion returned no content".to_string()))
    }
}
