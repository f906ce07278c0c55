//! Prompt assembly.
//!
//! Templates use `{name}` placeholders with `{{` and `}}` as literal-brace
//! escapes. Substitution is a single pass over the template, so braces that
//! appear inside bound values are copied through untouched.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::FactoredError;
use crate::model::ModelConfig;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Variable bindings used to fill a template.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// A parameterized prompt string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the placeholders this template requires, in first-use order.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for caps in TOKEN_RE.captures_iter(&self.source) {
            if let Some(name) = caps.get(1) {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }
        names
    }

    /// Fill every placeholder from `bindings`.
    ///
    /// Fails with [`FactoredError::MissingVariable`] naming the first
    /// placeholder that has no binding. Bindings the template does not use
    /// are ignored.
    pub fn render(&self, bindings: &Bindings) -> Result<String, FactoredError> {
        let mut out = String::with_capacity(self.source.len());
        let mut last = 0;

        for caps in TOKEN_RE.captures_iter(&self.source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&self.source[last..whole.start()]);

            match caps.get(1) {
                Some(name) => {
                    let value = bindings
                        .get(name.as_str())
                        .ok_or_else(|| FactoredError::MissingVariable(name.as_str().to_string()))?;
                    out.push_str(value);
                }
                None if whole.as_str() == "{{" => out.push('{'),
                None => out.push('}'),
            }

            last = whole.end();
        }

        out.push_str(&self.source[last..]);
        Ok(out)
    }
}

impl From<&str> for PromptTemplate {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

/// Render a template string in one call.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, FactoredError> {
    PromptTemplate::new(template).render(bindings)
}

/// A multi-turn exchange with one model, rendered with that model's
/// prompt and continuation templates.
#[derive(Debug, Clone)]
pub struct Conversation {
    system_message: String,
    prompts: Vec<String>,
    responses: Vec<String>,
}

impl Conversation {
    pub fn new(system_message: impl Into<String>, first_prompt: impl Into<String>) -> Self {
        Self {
            system_message: system_message.into(),
            prompts: vec![first_prompt.into()],
            responses: Vec::new(),
        }
    }

    /// Replace the system message (it changes from round to round in a debate).
    pub fn set_system_message(&mut self, system_message: impl Into<String>) {
        self.system_message = system_message.into();
    }

    /// Record the model's reply to the most recent prompt.
    pub fn record_response(&mut self, response: impl Into<String>) {
        self.responses.push(response.into());
    }

    /// Queue the next user prompt.
    pub fn push_prompt(&mut self, prompt: impl Into<String>) {
        self.prompts.push(prompt.into());
    }

    /// True when the last prompt has not been answered yet.
    pub fn awaiting_response(&self) -> bool {
        self.prompts.len() > self.responses.len()
    }

    /// Render the full conversation as one prompt string.
    ///
    /// The first prompt goes through the model's prompt template; every
    /// later prompt is appended through the continuation template together
    /// with the response that preceded it.
    pub fn render(&self, model: &ModelConfig) -> Result<String, FactoredError> {
        let Some(first) = self.prompts.first() else {
            return Err(FactoredError::InvalidArgument(
                "conversation has no prompts".to_string(),
            ));
        };

        let mut rendered = model.render_prompt(&self.system_message, first)?;
        for (response, prompt) in self.responses.iter().zip(self.prompts.iter().skip(1)) {
            rendered.push_str(&model.render_continuation(response, prompt)?);
        }
        Ok(rendered)
    }
}
