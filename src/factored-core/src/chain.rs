//! Multi-round chains built from recipes.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{InferenceEngine, SamplingParams};
use crate::error::FactoredError;
use crate::model::ModelConfig;
use crate::recipe::{CONTEXT_QA_TEMPLATE, QaRecipe};

pub const ORACLE_SYSTEM_MESSAGE: &str = "You are a truthful and helpful oracle. You may be provided with a background text passage as context, a question, and previous answers to this question. Please check if the most recent answer is correct. If the most recent answer is correct, repeat the most recent answer and add \"QED.\" at the end. If the most recent answer is incorrect, please correct the most recent answer and explain where the most recent answer went wrong.";

/// Every answer a question received, one per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementTrace {
    pub question: String,
    /// First-round question prompt, including any background context.
    pub prompt: String,
    pub answers: Vec<String>,
}

impl ImprovementTrace {
    pub fn final_answer(&self) -> Option<&str> {
        self.answers.last().map(String::as_str)
    }
}

/// Repeatedly asks the model to check and correct its latest answer.
///
/// Round 0 is plain question answering. Each later round shows the model
/// the whole question/answer history so far as context, under the oracle
/// system message.
#[derive(Debug, Clone)]
pub struct IterativeImprovement {
    uses_context: bool,
    num_rounds: u32,
    chain_of_thought: bool,
    params: SamplingParams,
}

impl IterativeImprovement {
    pub fn new(uses_context: bool, num_rounds: u32) -> Result<Self, FactoredError> {
        if num_rounds == 0 {
            return Err(FactoredError::InvalidArgument(
                "iterative improvement needs at least one round".to_string(),
            ));
        }
        Ok(Self {
            uses_context,
            num_rounds,
            chain_of_thought: false,
            params: SamplingParams::default(),
        })
    }

    pub fn with_chain_of_thought(mut self, enabled: bool) -> Self {
        self.chain_of_thought = enabled;
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn num_rounds(&self) -> u32 {
        self.num_rounds
    }

    pub async fn run(
        &self,
        engine: &dyn InferenceEngine,
        model: &ModelConfig,
        questions: &[String],
        contexts: Option<&[String]>,
    ) -> Result<Vec<ImprovementTrace>, FactoredError> {
        let first = QaRecipe::for_context(self.uses_context)
            .with_chain_of_thought(self.chain_of_thought)
            .with_params(self.params)
            .run(engine, model, questions, contexts)
            .await?;
        info!(round = 1, total = self.num_rounds, "improvement round complete");

        let mut traces: Vec<ImprovementTrace> = first
            .iter()
            .map(|answer| ImprovementTrace {
                question: answer.question.clone(),
                prompt: answer.prompt.clone(),
                answers: vec![answer.answer.clone()],
            })
            .collect();

        let checker = QaRecipe::new(true, ORACLE_SYSTEM_MESSAGE, CONTEXT_QA_TEMPLATE)
            .with_chain_of_thought(self.chain_of_thought)
            .with_params(self.params);

        let mut previous = first;
        for round in 1..self.num_rounds {
            let history: Vec<String> = previous
                .iter()
                .map(|answer| format!("{}\n\nAnswer: {}", answer.prompt, answer.answer))
                .collect();

            let answers = checker.run(engine, model, questions, Some(history.as_slice())).await?;
            for (trace, answer) in traces.iter_mut().zip(&answers) {
                trace.answers.push(answer.answer.clone());
            }
            info!(round = round + 1, total = self.num_rounds, "improvement round complete");
            previous = answers;
        }

        Ok(traces)
    }
}
