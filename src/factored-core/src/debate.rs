//! Debate orchestration.
//!
//! Two debaters argue opposite positions for a fixed number of rounds and
//! a judge then reads the whole transcript. Each debater keeps its own
//! conversation with the model; the opponent's latest statement becomes the
//! debater's next prompt.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{InferenceEngine, SamplingParams};
use crate::error::FactoredError;
use crate::model::ModelConfig;
use crate::prompt::{Bindings, Conversation, PromptTemplate};
use crate::recipe::RawGeneration;

const DEBATER_SYSTEM_TEMPLATE: &str = "You are a debater who wants to come to an agreeable solution to a debate with an opposing debater. You may disagree with your opponent if that is the best conclusion to the debate. You will be given a prompt for a debate and previous rounds of the debate (if applicable). You {agree_type} with, or are \"{position}\" this debate prompt. Please have a truthful and good faith debate with your opposing debater. The debate will last {num_rounds} rounds. Do not repeat yourself. Try to use no more than 1-2 sentences per round. {round_instruction}";

const DEBATE_PROMPT_TEMPLATE: &str = "Debate topic: {prompt}";
const DEBATE_CONTEXT_PROMPT_TEMPLATE: &str =
    "Background information for the debate: {context}\n\nDebate topic: {prompt}";

const JUDGE_PROMPT_TEMPLATE: &str = "{debate_prompt}\n\nTranscript of the debate:\n{transcript}\n\nWhich debater argued their position more convincingly? State the winning position (\"For\" or \"Against\") and briefly explain your verdict.";

pub const DEFAULT_JUDGE_SYSTEM_MESSAGE: &str = "You are an impartial judge of a debate between two debaters. One debater argues \"For\" the debate topic and the other argues \"Against\" it. Base your verdict only on the arguments made in the transcript.";

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Argues for the topic.
    DebaterA,
    /// Argues against the topic.
    DebaterB,
    Judge,
}

impl Role {
    pub fn display_name(&self) -> &str {
        match self {
            Role::DebaterA => "Debater A (For)",
            Role::DebaterB => "Debater B (Against)",
            Role::Judge => "Judge",
        }
    }

    fn position(&self) -> &str {
        match self {
            Role::DebaterA => "For",
            Role::DebaterB => "Against",
            Role::Judge => "Judge",
        }
    }
}

/// One entry in the debate transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the transcript, starting at 0.
    pub index: usize,
    /// 1-based debate round; `None` for the judge.
    pub round: Option<u32>,
    pub role: Role,
    pub text: String,
}

/// Append-only, ordered list of turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn; its index is the current length.
    pub fn push(&mut self, role: Role, round: Option<u32>, text: impl Into<String>) -> &Turn {
        let index = self.turns.len();
        self.turns.push(Turn {
            index,
            round,
            role,
            text: text.into(),
        });
        &self.turns[index]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The judge's verdict, once the debate has finished.
    pub fn verdict(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Judge)
            .map(|t| t.text.as_str())
    }

    /// Debate turns rendered for the judge, one per line.
    pub fn render_debate(&self) -> String {
        self.turns
            .iter()
            .filter(|t| t.role != Role::Judge)
            .map(|t| match t.round {
                Some(round) => format!("Round {round}, {}: {}", t.role.position(), t.text),
                None => format!("{}: {}", t.role.position(), t.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Where the debate currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateState {
    DebaterATurn { round: u32 },
    DebaterBTurn { round: u32 },
    JudgeTurn,
    Done,
}

impl DebateState {
    /// Transition after the current state's turn, for a debate of `rounds` rounds.
    pub fn next(self, rounds: u32) -> Self {
        match self {
            DebateState::DebaterATurn { round } => DebateState::DebaterBTurn { round },
            DebateState::DebaterBTurn { round } if round < rounds => {
                DebateState::DebaterATurn { round: round + 1 }
            }
            DebateState::DebaterBTurn { .. } => DebateState::JudgeTurn,
            DebateState::JudgeTurn | DebateState::Done => DebateState::Done,
        }
    }
}

/// Configuration for running a debate.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// The topic being debated.
    pub topic: String,
    /// Optional background passage shown to both debaters and the judge.
    pub context: Option<String>,
    pub rounds: u32,
    pub judge_system_message: String,
    pub params: SamplingParams,
}

impl DebateConfig {
    pub fn new(topic: impl Into<String>, rounds: u32) -> Self {
        Self {
            topic: topic.into(),
            context: None,
            rounds,
            judge_system_message: DEFAULT_JUDGE_SYSTEM_MESSAGE.to_string(),
            params: SamplingParams::default(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_judge_system_message(mut self, message: impl Into<String>) -> Self {
        self.judge_system_message = message.into();
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }
}

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted during a debate.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// A new round is starting.
    RoundStart { round: u32, total: u32 },
    /// A role is about to speak.
    TurnStart { role: Role },
    /// A turn was appended to the transcript.
    TurnComplete { turn: Turn },
    /// The judge has spoken.
    DebateEnd,
}

/// Runs one debate against one model.
pub struct DebateOrchestrator<'a> {
    config: DebateConfig,
    engine: &'a dyn InferenceEngine,
    model: &'a ModelConfig,
    generator: RawGeneration,
    state: DebateState,
    transcript: Transcript,
    /// Event callback.
    callback: Option<DebateCallback>,
}

impl<'a> DebateOrchestrator<'a> {
    pub fn new(
        config: DebateConfig,
        engine: &'a dyn InferenceEngine,
        model: &'a ModelConfig,
    ) -> Result<Self, FactoredError> {
        if config.rounds == 0 {
            return Err(FactoredError::InvalidArgument(
                "a debate needs at least one round".to_string(),
            ));
        }

        let generator = RawGeneration::new(config.params);
        Ok(Self {
            config,
            engine,
            model,
            generator,
            state: DebateState::DebaterATurn { round: 1 },
            transcript: Transcript::new(),
            callback: None,
        })
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn state(&self) -> DebateState {
        self.state
    }

    /// Get the transcript so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run the debate to completion and return the transcript.
    ///
    /// Any failed generation ends the debate with that error.
    pub async fn run(&mut self) -> Result<Transcript, FactoredError> {
        let debate_prompt = self.debate_prompt()?;
        let mut for_side: Option<Conversation> = None;
        let mut against_side: Option<Conversation> = None;

        loop {
            match self.state {
                DebateState::DebaterATurn { round } => {
                    self.emit_event(DebateEvent::RoundStart {
                        round,
                        total: self.config.rounds,
                    });
                    let system = self.debater_system_message(Role::DebaterA, round)?;
                    let mut conversation = match for_side.take() {
                        None => Conversation::new(system, debate_prompt.as_str()),
                        Some(mut conversation) => {
                            conversation.set_system_message(system);
                            conversation.push_prompt(self.latest_text(Role::DebaterB));
                            conversation
                        }
                    };
                    let prompt = conversation.render(self.model)?;
                    let text = self.speak(Role::DebaterA, Some(round), &prompt).await?;
                    conversation.record_response(text);
                    for_side = Some(conversation);
                }
                DebateState::DebaterBTurn { round } => {
                    let system = self.debater_system_message(Role::DebaterB, round)?;
                    let opponent = self.latest_text(Role::DebaterA);
                    let mut conversation = match against_side.take() {
                        None => Conversation::new(
                            system,
                            format!("{debate_prompt}\n\nYour opponent's opening statement: {opponent}"),
                        ),
                        Some(mut conversation) => {
                            conversation.set_system_message(system);
                            conversation.push_prompt(opponent);
                            conversation
                        }
                    };
                    let prompt = conversation.render(self.model)?;
                    let text = self.speak(Role::DebaterB, Some(round), &prompt).await?;
                    conversation.record_response(text);
                    against_side = Some(conversation);
                }
                DebateState::JudgeTurn => {
                    let prompt = self.judge_prompt(&debate_prompt)?;
                    self.speak(Role::Judge, None, &prompt).await?;
                    self.emit_event(DebateEvent::DebateEnd);
                }
                DebateState::Done => break,
            }
            self.state = self.state.next(self.config.rounds);
        }

        Ok(self.transcript.clone())
    }

    /// Generate, sanitize and record one turn; returns the recorded text.
    async fn speak(
        &mut self,
        role: Role,
        round: Option<u32>,
        prompt: &str,
    ) -> Result<String, FactoredError> {
        self.emit_event(DebateEvent::TurnStart { role });
        debug!(role = ?role, prompt = %prompt, "debate prompt");

        let response = self.generator.call(self.engine, self.model, prompt).await?;
        let text = sanitize_response(&response);
        if text.is_empty() {
            return Err(FactoredError::InferenceError(format!(
                "{} returned an empty response",
                role.display_name()
            )));
        }

        let turn = self.transcript.push(role, round, text.clone()).clone();
        info!(index = turn.index, role = ?role, round = ?round, "turn recorded");
        self.emit_event(DebateEvent::TurnComplete { turn });
        Ok(text)
    }

    fn latest_text(&self, role: Role) -> String {
        self.transcript
            .turns()
            .iter()
            .rev()
            .find(|t| t.role == role)
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    fn debate_prompt(&self) -> Result<String, FactoredError> {
        let mut bindings = Bindings::new().with("prompt", self.config.topic.as_str());
        let template = match &self.config.context {
            Some(context) => {
                bindings.insert("context", context.as_str());
                DEBATE_CONTEXT_PROMPT_TEMPLATE
            }
            None => DEBATE_PROMPT_TEMPLATE,
        };
        PromptTemplate::new(template).render(&bindings)
    }

    fn debater_system_message(&self, role: Role, round: u32) -> Result<String, FactoredError> {
        let agree_type = if role == Role::DebaterA { "agree" } else { "disagree" };
        PromptTemplate::new(DEBATER_SYSTEM_TEMPLATE).render(
            &Bindings::new()
                .with("agree_type", agree_type)
                .with("position", role.position())
                .with("num_rounds", self.config.rounds.to_string())
                .with("round_instruction", round_instruction(role, round, self.config.rounds)),
        )
    }

    fn judge_prompt(&self, debate_prompt: &str) -> Result<String, FactoredError> {
        let prompt = PromptTemplate::new(JUDGE_PROMPT_TEMPLATE).render(
            &Bindings::new()
                .with("debate_prompt", debate_prompt)
                .with("transcript", self.transcript.render_debate()),
        )?;
        self.model
            .render_prompt(&self.config.judge_system_message, &prompt)
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: DebateEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

/// Round-specific closing sentence of a debater's system message.
fn round_instruction(role: Role, round: u32, rounds: u32) -> String {
    if round == 1 {
        match role {
            Role::DebaterA => "This is the first round. Please provide an opening statement for your position after being provided with the debate prompt.".to_string(),
            _ => "This is the first round. Please provide a response to your opponent's opening statement.".to_string(),
        }
    } else if round == rounds {
        match role {
            Role::DebaterA => "This is the final round. Please provide a final response to your opponent's previous statement.".to_string(),
            _ => "This is the final round. Please provide a final response to your opponent's previous statement, along with a closing statement.".to_string(),
        }
    } else {
        format!(
            "There are {} rounds remaining. Please provide a response to your opponent's previous statement.",
            rounds - round + 1
        )
    }
}

/// Reasoning blocks some models emit before answering, stripped with their content.
static REASONING_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(thinking|think|reflection|reflect|internal|reasoning|thought|scratchpad|plan|analysis)\b[^>]*>.*?</(thinking|think|reflection|reflect|internal|reasoning|thought|scratchpad|plan|analysis)>",
    )
    .expect("valid reasoning block regex")
});

static ORPHAN_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][\w]*[^>]*>").expect("valid tag regex"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Llama-2 sometimes echoes its own turn markers.
const TURN_MARKERS: [&str; 4] = ["</s>", "<s>", "[INST]", "[/INST]"];

/// Strip reasoning blocks, stray tags and turn markers from a model reply
/// and collapse whitespace.
fn sanitize_response(response: &str) -> String {
    let mut result = REASONING_BLOCK_RE.replace_all(response, "").into_owned();
    for marker in TURN_MARKERS {
        result = result.replace(marker, "");
    }
    let result = ORPHAN_TAG_RE.replace_all(&result, "");
    WHITESPACE_RE.replace_all(&result, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use crate::model::{DEFAULT_MODEL, ModelRegistry};
    use std::sync::{Arc, Mutex};

    fn scripted(rounds: u32) -> ScriptedEngine {
        let mut responses = Vec::new();
        for round in 1..=rounds {
            responses.push(format!("For argument {round}."));
            responses.push(format!("Against argument {round}."));
        }
        responses.push("For wins.".to_string());
        ScriptedEngine::new(responses)
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut state = DebateState::DebaterATurn { round: 1 };
        let mut seen = vec![state];
        while state != DebateState::Done {
            state = state.next(2);
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                DebateState::DebaterATurn { round: 1 },
                DebateState::DebaterBTurn { round: 1 },
                DebateState::DebaterATurn { round: 2 },
                DebateState::DebaterBTurn { round: 2 },
                DebateState::JudgeTurn,
                DebateState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_debate_produces_two_n_plus_one_turns() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();

        for rounds in 1..=4 {
            let engine = scripted(rounds);
            let mut orchestrator =
                DebateOrchestrator::new(DebateConfig::new("AI should be open source", rounds), &engine, model)
                    .unwrap();
            let transcript = orchestrator.run().await.unwrap();

            assert_eq!(transcript.len(), 2 * rounds as usize + 1);
            assert_eq!(transcript.last().unwrap().role, Role::Judge);
            assert_eq!(transcript.verdict(), Some("For wins."));
            assert_eq!(orchestrator.state(), DebateState::Done);

            for (i, turn) in transcript.turns().iter().enumerate() {
                assert_eq!(turn.index, i);
            }
            for pair in transcript.turns()[..2 * rounds as usize].chunks(2) {
                assert_eq!(pair[0].role, Role::DebaterA);
                assert_eq!(pair[1].role, Role::DebaterB);
                assert_eq!(pair[0].round, pair[1].round);
            }
        }
    }

    #[tokio::test]
    async fn test_debaters_see_opponent_statements() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = scripted(2);

        let mut orchestrator =
            DebateOrchestrator::new(DebateConfig::new("Cats are better than dogs", 2), &engine, model).unwrap();
        orchestrator.run().await.unwrap();

        let prompts = engine.prompts();
        assert_eq!(prompts.len(), 5);

        // A, round 1
        assert!(prompts[0].contains("Debate topic: Cats are better than dogs"));
        assert!(prompts[0].contains("You agree with, or are \"For\" this debate prompt."));
        assert!(prompts[0].contains("opening statement for your position"));
        // B, round 1 sees A's opening
        assert!(prompts[1].contains("You disagree with, or are \"Against\""));
        assert!(prompts[1].contains("Your opponent's opening statement: For argument 1."));
        // A, round 2 continues its own conversation with B's reply
        assert!(prompts[2].contains("For argument 1.</s><s>[INST] Against argument 1. [/INST] "));
        assert!(prompts[2].contains("This is the final round."));
        // B, round 2
        assert!(prompts[3].contains("Against argument 1.</s><s>[INST] For argument 2. [/INST] "));
        assert!(prompts[3].contains("along with a closing statement"));
        // Judge sees the whole debate
        assert!(prompts[4].contains("impartial judge"));
        assert!(prompts[4].contains("Round 1, For: For argument 1."));
        assert!(prompts[4].contains("Round 2, Against: Against argument 2."));
    }

    #[tokio::test]
    async fn test_context_goes_into_debate_prompt() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = scripted(1);

        let config = DebateConfig::new("Is Paris the capital of France?", 1)
            .with_context("The capital of France is Paris.");
        DebateOrchestrator::new(config, &engine, model)
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(engine.prompts()[0].contains(
            "Background information for the debate: The capital of France is Paris.\n\nDebate topic: Is Paris the capital of France?"
        ));
    }

    #[tokio::test]
    async fn test_engine_failure_is_terminal() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = ScriptedEngine::new(["For opening."]).then_fail("connection refused");

        let mut orchestrator =
            DebateOrchestrator::new(DebateConfig::new("topic", 3), &engine, model).unwrap();
        let result = orchestrator.run().await;

        assert!(matches!(result, Err(FactoredError::InferenceError(_))));
        assert_eq!(orchestrator.transcript().len(), 1);
        assert!(orchestrator.transcript().verdict().is_none());
        assert_eq!(engine.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_response_is_an_error() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = ScriptedEngine::new(["<thinking>nothing to say</thinking>"]);

        let result = DebateOrchestrator::new(DebateConfig::new("topic", 1), &engine, model)
            .unwrap()
            .run()
            .await;
        assert!(matches!(result, Err(FactoredError::InferenceError(_))));
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = ScriptedEngine::new(Vec::<String>::new());
        let result = DebateOrchestrator::new(DebateConfig::new("topic", 0), &engine, model);
        assert!(matches!(result, Err(FactoredError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let registry = ModelRegistry::builtin();
        let model = registry.get(DEFAULT_MODEL).unwrap();
        let engine = scripted(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);

        let mut orchestrator = DebateOrchestrator::new(DebateConfig::new("topic", 1), &engine, model)
            .unwrap()
            .with_callback(Box::new(move |event| {
                let label = match event {
                    DebateEvent::RoundStart { round, .. } => format!("round {round}"),
                    DebateEvent::TurnStart { role } => format!("start {role:?}"),
                    DebateEvent::TurnComplete { turn } => format!("done {}", turn.index),
                    DebateEvent::DebateEnd => "end".to_string(),
                };
                sink.lock().unwrap().push(label);
            }));
        orchestrator.run().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "round 1",
                "start DebaterA",
                "done 0",
                "start DebaterB",
                "done 1",
                "start Judge",
                "done 2",
                "end",
            ]
        );
    }

    #[test]
    fn test_round_instruction_middle_rounds() {
        let text = round_instruction(Role::DebaterB, 2, 4);
        assert!(text.starts_with("There are 3 rounds remaining."));
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<thinking>Let me think about this...</thinking>The answer is 42.";
        let output = sanitize_response(input);
        assert_eq!(output, "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_multiline_tags() {
        let input = "<thinking>\nMultiple\nlines\nof\nthought\n</thinking>Final answer here.";
        let output = sanitize_response(input);
        assert_eq!(output, "Final answer here.");
    }

    #[test]
    fn test_sanitize_response_turn_markers() {
        let input = " I disagree. </s><s>[INST] ";
        assert_eq!(sanitize_response(input), "I disagree.");
    }

    #[test]
    fn test_sanitize_response_several_blocks() {
        let input = "<think>a</think>For. <reflection note=\"x\">b</reflection>Because <b>it</b> works.";
        assert_eq!(sanitize_response(input), "For. Because it works.");
    }

    #[test]
    fn test_sanitize_response_no_tags() {
        let input = "No tags here,  just\ntext.";
        assert_eq!(sanitize_response(input), "No tags here, just text.");
    }
}
