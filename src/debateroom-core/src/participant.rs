//! Debate roles and the per-agent profile.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side an agent argues in the debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Arguing in favor of the topic.
    Pros,
    /// Arguing against the topic.
    Cons,
}

impl Role {
    pub const BOTH: [Role; 2] = [Role::Pros, Role::Cons];

    /// The opposing side.
    pub fn other(self) -> Role {
        match self {
            Role::Pros => Role::Cons,
            Role::Cons => Role::Pros,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Pros => "pros",
            Role::Cons => "cons",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Pros => "PROS",
            Role::Cons => "CONS",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Pros => 0,
            Role::Cons => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An AI participant in the debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Display name, shown on every message this agent produces.
    pub name: String,
    /// The LLM model to use (e.g., "gpt-4o-mini", "gemini-2.0-flash").
    pub model: String,
    /// OpenAI-compatible base URL; falls back to the process default when unset.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Voice ID for TTS.
    pub voice: String,
    /// System prompt for this side.
    pub prompt: String,
    /// Completion length cap per turn.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    400
}

impl AgentProfile {
    /// Create a profile with the given name, model and voice.
    pub fn new(name: impl Into<String>, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_base: None,
            voice: voice.into(),
            prompt: String::new(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Set the system prompt.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}
