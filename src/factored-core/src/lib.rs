//! Factored cognition core library.
//!
//! Model registry, prompt assembly, QA recipes, iterative improvement,
//! debate orchestration and paper extraction, built over an external
//! OpenAI-compatible inference server.

pub mod chain;
pub mod config;
pub mod debate;
pub mod engine;
pub mod error;
pub mod model;
pub mod paper;
pub mod prompt;
pub mod recipe;

pub use chain::{ImprovementTrace, IterativeImprovement};
pub use config::{Backend, Config, EngineConfig};
pub use debate::{DebateConfig, DebateEvent, DebateOrchestrator, DebateState, Role, Transcript, Turn};
pub use engine::{InferenceEngine, SamplingParams, ScoredText};
pub use error::FactoredError;
pub use model::{ModelConfig, ModelRegistry};
pub use paper::{Document, Section, Subsection};
pub use prompt::{Bindings, Conversation, PromptTemplate};
pub use recipe::{AuthorSplit, Classification, QaAnswer, QaRecipe, RawGeneration};
