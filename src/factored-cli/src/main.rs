//! Factored cognition CLI.
//!
//! Runs question answering, iterative improvement, debates and paper
//! extraction against an OpenAI-compatible inference server.

use std::env;
use std::error::Error;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use factored_core::config::{self, Backend, Config};
use factored_core::{
    AuthorSplit, Classification, DebateConfig, DebateEvent, DebateOrchestrator, FactoredError,
    IterativeImprovement, ModelConfig, ModelRegistry, QaRecipe, Role, engine, paper,
};

#[derive(Parser)]
#[command(
    name = "factored",
    version,
    about = "Factored cognition experiments: QA, iterative improvement, debate, paper QA",
    long_about = "A CLI harness for factored cognition prompting patterns over an OpenAI-compatible inference server."
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Inference backend: "completion" or "chat" (overrides the config file)
    #[arg(long, global = true, value_name = "BACKEND")]
    backend: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the registered models
    Models,

    /// Answer questions, optionally against background context
    Qa {
        /// Question to ask (repeatable)
        #[arg(short, long = "question", action = ArgAction::Append, required = true, value_name = "QUESTION")]
        questions: Vec<String>,

        /// Background context, one per question (repeatable)
        #[arg(short, long = "context", action = ArgAction::Append, value_name = "CONTEXT")]
        contexts: Vec<String>,

        /// Use chain-of-thought prompting
        #[arg(long)]
        cot: bool,

        /// Model to use
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Score Yes/No questions by the model's probability of answering "Yes"
    Classify {
        /// Yes/No question to score (repeatable)
        #[arg(short, long = "question", action = ArgAction::Append, required = true, value_name = "QUESTION")]
        questions: Vec<String>,

        /// Model to use
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Answer, then repeatedly check and correct the answers
    Improve {
        /// Question to ask (repeatable)
        #[arg(short, long = "question", action = ArgAction::Append, required = true, value_name = "QUESTION")]
        questions: Vec<String>,

        /// Background context, one per question (repeatable)
        #[arg(short, long = "context", action = ArgAction::Append, value_name = "CONTEXT")]
        contexts: Vec<String>,

        /// Number of rounds
        #[arg(short, long, value_name = "ROUNDS")]
        rounds: Option<u32>,

        /// Use chain-of-thought prompting
        #[arg(long)]
        cot: bool,

        /// Model to use
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Run a two-sided debate closed by a judge
    Debate {
        /// The topic to debate
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Background information shown to the debaters and the judge
        #[arg(short, long, value_name = "CONTEXT")]
        context: Option<String>,

        /// Number of debate rounds
        #[arg(short, long, value_name = "ROUNDS")]
        rounds: Option<u32>,

        /// Print the transcript as JSON instead of formatted text
        #[arg(long)]
        json: bool,

        /// Model to use
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
    },

    /// Extract a paper from a PDF and optionally ask a question about it
    Paper {
        /// Path to the PDF
        #[arg(value_name = "PDF")]
        path: PathBuf,

        /// Question answered using the abstract (or --section) as context
        #[arg(short, long, value_name = "QUESTION")]
        question: Option<String>,

        /// Use this section's text as context instead of the abstract
        #[arg(short, long, value_name = "NUMBER")]
        section: Option<u32>,

        /// Ask the model to clean up the author list
        #[arg(long)]
        llm_authors: bool,

        /// Print the extracted paper as JSON
        #[arg(long)]
        json: bool,

        /// Model to use
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Load the config file (or the embedded default) and apply overrides.
fn load_config(cli: &Cli) -> Result<Config, FactoredError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => config::default_config(),
    };

    if let Ok(api_base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.engine.api_base = api_base;
    }
    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        config.engine.api_key = api_key;
    }
    if let Some(backend) = &cli.backend {
        config.engine.backend = Backend::parse(backend)?;
    }
    if config.engine.backend == Backend::Chat && config.engine.api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY not set; chat API calls may fail");
    }

    tracing::debug!(
        api_base = %config.engine.api_base,
        backend = ?config.engine.backend,
        "configuration loaded"
    );
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(&cli)?;
    let registry = config.registry()?;

    match cli.command {
        Command::Models => print_models(&registry),
        Command::Qa {
            questions,
            contexts,
            cot,
            model,
        } => {
            let model = select_model(&registry, &config, model.as_deref())?;
            let engine = engine::connect(&config.engine)?;
            let contexts = optional_contexts(contexts);

            let answers = QaRecipe::for_context(contexts.is_some())
                .with_system_message(config.prompts.qa_system_message.as_str())
                .with_chain_of_thought(cot)
                .with_params(config.sampling)
                .run(engine.as_ref(), model, &questions, contexts.as_deref())
                .await?;

            for answer in answers {
                println!("{}", answer.prompt.bright_white());
                println!();
                println!("{} {}", "Answer:".bold(), answer.answer);
                println!();
            }
        }
        Command::Classify { questions, model } => {
            let model = select_model(&registry, &config, model.as_deref())?;
            let engine = engine::connect(&config.engine)?;

            let probabilities = Classification::default()
                .run(engine.as_ref(), model, &questions)
                .await?;

            for (question, probability) in questions.iter().zip(probabilities) {
                let score = match probability {
                    Some(p) => format!("{p:.3}").bright_green(),
                    None => "unclassified".yellow(),
                };
                println!("{} {}", question.bright_white(), score);
            }
        }
        Command::Improve {
            questions,
            contexts,
            rounds,
            cot,
            model,
        } => {
            let model = select_model(&registry, &config, model.as_deref())?;
            let engine = engine::connect(&config.engine)?;
            let contexts = optional_contexts(contexts);
            let rounds = rounds.unwrap_or(config.defaults.improve_rounds);

            let traces = IterativeImprovement::new(contexts.is_some(), rounds)?
                .with_chain_of_thought(cot)
                .with_params(config.sampling)
                .run(engine.as_ref(), model, &questions, contexts.as_deref())
                .await?;

            for trace in traces {
                println!("{} {}", "Question:".bold(), trace.prompt.bright_white());
                println!();
                for (i, answer) in trace.answers.iter().enumerate() {
                    println!("{}", format!("Answer {}:", i + 1).yellow());
                    println!("{}", answer);
                    println!();
                }
            }
        }
        Command::Debate {
            topic,
            context,
            rounds,
            json,
            model,
        } => {
            let model = select_model(&registry, &config, model.as_deref())?;
            let engine = engine::connect(&config.engine)?;
            let rounds = rounds.unwrap_or(config.defaults.debate_rounds);

            let mut debate = DebateConfig::new(topic.as_str(), rounds)
                .with_judge_system_message(config.prompts.judge_system_message.as_str())
                .with_params(config.sampling);
            if let Some(context) = context {
                debate = debate.with_context(context);
            }

            let mut orchestrator = DebateOrchestrator::new(debate, engine.as_ref(), model)?;
            if !json {
                print_debate_header(&topic, rounds, model);
                orchestrator = orchestrator.with_callback(create_console_callback());
            }

            let transcript = orchestrator.run().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&transcript)?);
            } else {
                println!();
                println!("{}", "═".repeat(70).bright_blue());
                println!("{}", "  Debate concluded.".bright_green().bold());
                println!("{}", "═".repeat(70).bright_blue());
                println!();
            }
        }
        Command::Paper {
            path,
            question,
            section,
            llm_authors,
            json,
            model,
        } => {
            let mut document = paper::extract_document(&path)?;

            let needs_model = llm_authors || question.is_some();
            let mut answer = None;
            if needs_model {
                let model = select_model(&registry, &config, model.as_deref())?;
                let engine = engine::connect(&config.engine)?;

                if llm_authors {
                    document.authors = AuthorSplit::new(config.sampling)
                        .call(engine.as_ref(), model, &document.authors)
                        .await?;
                }

                if let Some(question) = question {
                    let context = match section {
                        Some(number) => document
                            .section(number)
                            .map(|s| s.text())
                            .ok_or_else(|| {
                                FactoredError::InvalidArgument(format!(
                                    "paper has no section {number}"
                                ))
                            })?,
                        None => document.abstract_text(),
                    };
                    if context.trim().is_empty() {
                        return Err(FactoredError::InvalidArgument(
                            "selected paper text is empty; try --section".to_string(),
                        )
                        .into());
                    }

                    let questions = vec![question];
                    let contexts = vec![context];
                    let mut answers = QaRecipe::with_context()
                        .with_system_message(config.prompts.qa_system_message.as_str())
                        .with_params(config.sampling)
                        .run(engine.as_ref(), model, &questions, Some(contexts.as_slice()))
                        .await?;
                    answer = answers.pop();
                }
            }

            if json {
                let output = serde_json::json!({
                    "document": document,
                    "answer": answer,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_document(&document);
                if let Some(answer) = answer {
                    println!();
                    println!("{} {}", "Answer:".bold(), answer.answer);
                }
            }
        }
    }

    Ok(())
}

fn select_model<'r>(
    registry: &'r ModelRegistry,
    config: &Config,
    requested: Option<&str>,
) -> Result<&'r ModelConfig, FactoredError> {
    registry.get(requested.unwrap_or(&config.defaults.model))
}

fn optional_contexts(contexts: Vec<String>) -> Option<Vec<String>> {
    if contexts.is_empty() {
        None
    } else {
        Some(contexts)
    }
}

fn print_models(registry: &ModelRegistry) {
    println!("{}", "Registered models:".bold());
    for model in registry.iter() {
        println!(
            "  {} - vocab {}, context {} ({}{})",
            model.name.bright_cyan(),
            model.vocab_size,
            model.context_length,
            model.engine_model.dimmed(),
            model
                .quantization
                .as_deref()
                .map(|q| format!(", {q}"))
                .unwrap_or_default()
        );
    }
}

fn print_debate_header(topic: &str, rounds: u32, model: &ModelConfig) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {} rounds", "Debate".bold(), rounds)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!("{} {}", "Model:".bold(), model.name.dimmed());
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

fn print_document(document: &paper::Document) {
    println!("{} {}", "Title:".bold(), document.title.bright_white());
    println!("{} {}", "Authors:".bold(), document.authors);
    println!();
    println!("{}", "Abstract".bright_magenta().bold());
    for line in textwrap(&document.abstract_text(), 70).lines() {
        println!("  {}", line);
    }
    println!();
    println!("{}", "Sections".bright_magenta().bold());
    for section in &document.sections {
        println!(
            "  {}. {} {}",
            section.number,
            section.heading.bright_cyan(),
            format!("(p. {})", section.page).dimmed()
        );
        for subsection in section.subsections.iter().skip(1) {
            println!(
                "     {} {} {}",
                subsection.number,
                subsection.heading,
                format!("(p. {})", subsection.page).dimmed()
            );
        }
    }
}

/// Create a callback that prints debate events to the console.
fn create_console_callback() -> Box<dyn Fn(DebateEvent) + Send + Sync> {
    Box::new(move |event| match event {
        DebateEvent::RoundStart { round, total } => {
            println!();
            println!(
                "{}",
                format!("  ROUND {} of {}", round, total)
                    .bright_magenta()
                    .bold()
            );
            println!();
        }
        DebateEvent::TurnStart { role } => {
            let label = role.display_name();
            let label = match role {
                Role::DebaterA => label.bright_cyan().bold(),
                Role::DebaterB => label.bright_yellow().bold(),
                Role::Judge => {
                    println!("{}", "─".repeat(70).dimmed());
                    label.bright_green().bold()
                }
            };
            println!("{} {}", "▶".bright_cyan(), label);
        }
        DebateEvent::TurnComplete { turn } => {
            // Word wrap and indent the content
            let wrapped = textwrap(&turn.text, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
            println!();
        }
        DebateEvent::DebateEnd => {
            // Handled in run
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
