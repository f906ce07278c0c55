//! Recipes: single prompt-build plus generate steps.
//!
//! A recipe turns a question (and optional background context) into a
//! model-ready prompt, sends it to the inference engine and returns the
//! answer. Chains and the debate orchestrator are built from these.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{InferenceEngine, SamplingParams};
use crate::error::FactoredError;
use crate::model::ModelConfig;
use crate::prompt::{Bindings, PromptTemplate};

pub const DEFAULT_QA_SYSTEM_MESSAGE: &str = "You are a truthful and helpful oracle. Please answer the following question truthfully and concisely.";

/// Appended to the question when chain-of-thought prompting is enabled.
pub const CHAIN_OF_THOUGHT_SUFFIX: &str = "Let's think step by step.";

pub const PLAIN_QA_TEMPLATE: &str = "Question: {prompt}";
pub const CONTEXT_QA_TEMPLATE: &str = "{context}\n\nQuestion: {prompt}";

pub const CLASSIFICATION_SYSTEM_MESSAGE: &str = "You are a truthful and helpful oracle. Please only answer Yes or No to the following questions.";

const AUTHOR_SPLIT_SYSTEM_MESSAGE: &str = "You are a helpful assistant. You will be given the unformatted author list of a research paper, possibly including affiliations, emails and footnote markers. Reply with only the full names of the authors, separated by commas.";

/// One answered question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaAnswer {
    pub question: String,
    /// Question prompt before the model template was applied.
    pub prompt: String,
    pub answer: String,
}

/// Question answering with or without background context.
#[derive(Debug, Clone)]
pub struct QaRecipe {
    system_message: String,
    template: PromptTemplate,
    uses_context: bool,
    chain_of_thought: bool,
    params: SamplingParams,
}

impl QaRecipe {
    /// Recipe with an explicit system message and template.
    ///
    /// `template` must use `{prompt}`, and `{context}` when `uses_context`.
    pub fn new(
        uses_context: bool,
        system_message: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            system_message: system_message.into(),
            template: PromptTemplate::new(template),
            uses_context,
            chain_of_thought: false,
            params: SamplingParams::default(),
        }
    }

    pub fn no_context() -> Self {
        Self::new(false, DEFAULT_QA_SYSTEM_MESSAGE, PLAIN_QA_TEMPLATE)
    }

    pub fn with_context() -> Self {
        Self::new(true, DEFAULT_QA_SYSTEM_MESSAGE, CONTEXT_QA_TEMPLATE)
    }

    /// Pick the preset matching whether context is supplied.
    pub fn for_context(uses_context: bool) -> Self {
        if uses_context {
            Self::with_context()
        } else {
            Self::no_context()
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = system_message.into();
        self
    }

    pub fn with_chain_of_thought(mut self, enabled: bool) -> Self {
        self.chain_of_thought = enabled;
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn uses_context(&self) -> bool {
        self.uses_context
    }

    /// Fill the question template (without the model's wrapper).
    pub fn question_prompt(&self, question: &str, context: Option<&str>) -> Result<String, FactoredError> {
        let question = if self.chain_of_thought {
            format!("{question} {CHAIN_OF_THOUGHT_SUFFIX}")
        } else {
            question.to_string()
        };

        let mut bindings = Bindings::new().with("prompt", question);
        if let Some(context) = context {
            bindings.insert("context", context);
        }
        self.template.render(&bindings)
    }

    /// Full model-ready prompt.
    pub fn build_prompt(
        &self,
        model: &ModelConfig,
        question: &str,
        context: Option<&str>,
    ) -> Result<String, FactoredError> {
        let prompt = self.question_prompt(question, context)?;
        model.render_prompt(&self.system_message, &prompt)
    }

    /// Answer each question in order. `contexts`, when required, pairs
    /// one-to-one with `questions`.
    pub async fn run(
        &self,
        engine: &dyn InferenceEngine,
        model: &ModelConfig,
        questions: &[String],
        contexts: Option<&[String]>,
    ) -> Result<Vec<QaAnswer>, FactoredError> {
        match (self.uses_context, contexts) {
            (true, None) => {
                return Err(FactoredError::InvalidArgument(
                    "recipe uses context but no context was provided".to_string(),
                ));
            }
            (false, Some(_)) => {
                return Err(FactoredError::InvalidArgument(
                    "recipe does not use context but context was provided".to_string(),
                ));
            }
            (true, Some(contexts)) if contexts.len() != questions.len() => {
                return Err(FactoredError::InvalidArgument(format!(
                    "{} questions but {} contexts",
                    questions.len(),
                    contexts.len()
                )));
            }
            _ => {}
        }

        let mut answers = Vec::with_capacity(questions.len());
        for (i, question) in questions.iter().enumerate() {
            let context = contexts.map(|c| c[i].as_str());
            let prompt = self.question_prompt(question, context)?;
            let full_prompt = model.render_prompt(&self.system_message, &prompt)?;
            debug!(question = %question, prompt = %full_prompt, "qa prompt");

            let answer = engine.generate(model, &full_prompt, &self.params).await?;
            info!(index = i, "answered question");
            answers.push(QaAnswer {
                question: question.clone(),
                prompt,
                answer: answer.trim().to_string(),
            });
        }
        Ok(answers)
    }
}

/// Yes/No classification scored from the first token's log probability.
///
/// Each result is the probability of "Yes": `exp(logprob)` when the model
/// answers "Yes", `1 - exp(logprob)` when it answers "No", and `None` when
/// the reply is neither.
#[derive(Debug, Clone)]
pub struct Classification {
    system_message: String,
    params: SamplingParams,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            system_message: CLASSIFICATION_SYSTEM_MESSAGE.to_string(),
            params: SamplingParams {
                temperature: 1.0,
                top_p: 1.0,
                max_tokens: 1,
            },
        }
    }
}

impl Classification {
    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = system_message.into();
        self
    }

    pub async fn run(
        &self,
        engine: &dyn InferenceEngine,
        model: &ModelConfig,
        prompts: &[String],
    ) -> Result<Vec<Option<f64>>, FactoredError> {
        let mut probabilities = Vec::with_capacity(prompts.len());
        for (i, prompt) in prompts.iter().enumerate() {
            let full_prompt = model.render_prompt(&self.system_message, prompt)?;
            debug!(prompt = %full_prompt, "classification prompt");

            let scored = engine.generate_scored(model, &full_prompt, &self.params).await?;
            let yes = match scored.text.trim() {
                "Yes" => true,
                "No" => false,
                other => {
                    debug!(index = i, reply = %other, "reply is neither Yes nor No");
                    probabilities.push(None);
                    continue;
                }
            };
            let logprob = scored.first_token_logprob.ok_or_else(|| {
                FactoredError::InferenceError("classification reply carried no log probability".to_string())
            })?;
            let p = logprob.exp();
            probabilities.push(Some(if yes { p } else { 1.0 - p }));
        }
        Ok(probabilities)
    }
}

/// Sends already-rendered prompts unchanged.
#[derive(Debug, Clone, Default)]
pub struct RawGeneration {
    params: SamplingParams,
}

impl RawGeneration {
    pub fn new(params: SamplingParams) -> Self {
        Self { params }
    }

    pub async fn call(
        &self,
        engine: &dyn InferenceEngine,
        model: &ModelConfig,
        prompt: &str,
    ) -> Result<String, FactoredError> {
        debug!(prompt = %prompt, "raw generation");
        let text = engine.generate(model, prompt, &self.params).await?;
        Ok(text.trim().to_string())
    }
}

/// Uses the model to tidy a raw author line into comma-separated names.
#[derive(Debug, Clone, Default)]
pub struct AuthorSplit {
    params: SamplingParams,
}

impl AuthorSplit {
    pub fn new(params: SamplingParams) -> Self {
        Self { params }
    }

    pub async fn call(
        &self,
        engine: &dyn InferenceEngine,
        model: &ModelConfig,
        raw_authors: &str,
    ) -> Result<String, FactoredError> {
        let prompt = model.render_prompt(AUTHOR_SPLIT_SYSTEM_MESSAGE, raw_authors)?;
        let text = engine.generate(model, &prompt, &self.params).await?;
        Ok(strip_answer_prefix(&text).to_string())
    }
}

fn strip_answer_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed.strip_prefix("Answer:").unwrap_or(trimmed).trim()
}
