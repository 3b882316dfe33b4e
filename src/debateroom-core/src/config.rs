//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::DebateError;
use crate::participant::{AgentProfile, Role};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debate: DebateSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub pacing: PacingSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub supervision: SupervisionSettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// Turn limits and the coalescing policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    /// Finalized messages after which the session closes.
    pub max_turns: u32,
    /// Messages kept in the session log; oldest are evicted first.
    pub log_capacity: usize,
    /// Similarity (0-100) below which typed text counts as a new intent.
    pub similarity_threshold: u8,
    /// An interrupted reveal longer than this stays visible with a `...` suffix.
    pub keep_partial_chars: usize,
    /// Side that receives user input and the opening topic.
    pub opening_role: Role,
    /// Announcement sent when a topic is chosen; `{topic}` is substituted.
    pub topic_template: String,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            max_turns: 10,
            log_capacity: 100,
            similarity_threshold: 60,
            keep_partial_chars: 120,
            opening_role: Role::Pros,
            topic_template: "토론 주제는 {topic} 입니다.".to_string(),
        }
    }
}

/// Session code generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub code_length: usize,
    pub code_alphabet: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            code_length: 2,
            code_alphabet: "ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string(),
        }
    }
}

/// Typing pace: `min + Beta(alpha, beta) * (max - min)` seconds per character.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub alpha: f64,
    pub beta: f64,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 3.0,
            min_delay_secs: 0.01,
            max_delay_secs: 0.35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Upper bound on one model or TTS call.
    pub provider_secs: f64,
    /// Upper bound on waiting for the client's playback acknowledgement.
    pub playback_secs: f64,
    /// Upper bound on joining a worker during teardown before it is aborted.
    pub join_secs: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            provider_secs: 120.0,
            playback_secs: 180.0,
            join_secs: 5.0,
        }
    }
}

impl TimeoutSettings {
    pub fn provider(&self) -> Duration {
        Duration::from_secs_f64(self.provider_secs)
    }

    pub fn playback(&self) -> Duration {
        Duration::from_secs_f64(self.playback_secs)
    }

    pub fn join(&self) -> Duration {
        Duration::from_secs_f64(self.join_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisionSettings {
    /// Panicking turns a worker survives before it gives up.
    pub max_restarts: u32,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self { max_restarts: 3 }
    }
}

/// End-of-debate evaluation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JudgeSettings {
    /// Ask a model for a verdict once the debate closes.
    pub enabled: bool,
    pub model: String,
    /// OpenAI-compatible base URL; falls back to the process default when unset.
    pub api_base: Option<String>,
    pub max_tokens: u32,
    /// Word n-gram size for the diversity index.
    pub diversity_n: usize,
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o".to_string(),
            api_base: None,
            max_tokens: 800,
            diversity_n: 2,
        }
    }
}

/// One profile per side.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentsConfig {
    pub pros: AgentProfile,
    pub cons: AgentProfile,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            pros: AgentProfile::new("gpt", "gpt-4o-mini", "af_sky").with_prompt(DEFAULT_PROS_PROMPT),
            cons: AgentProfile::new("gemini", "gemini-2.0-flash", "bm_george")
                .with_prompt(DEFAULT_CONS_PROMPT),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session machinery cannot run with.
    pub fn validate(&self) -> Result<(), DebateError> {
        let fail = |msg: &str| Err(DebateError::ConfigError(msg.to_string()));

        if self.debate.max_turns == 0 {
            return fail("debate.max_turns must be at least 1");
        }
        if self.debate.log_capacity == 0 {
            return fail("debate.log_capacity must be at least 1");
        }
        if self.debate.similarity_threshold > 100 {
            return fail("debate.similarity_threshold must be within 0-100");
        }
        if self.registry.code_length == 0 || self.registry.code_alphabet.is_empty() {
            return fail("registry.code_length and registry.code_alphabet must be non-empty");
        }
        let p = &self.pacing;
        if !(p.alpha.is_finite() && p.beta.is_finite() && p.alpha > 0.0 && p.beta > 0.0) {
            return fail("pacing.alpha and pacing.beta must be positive");
        }
        if !(p.min_delay_secs.is_finite() && p.max_delay_secs.is_finite())
            || p.min_delay_secs < 0.0
            || p.max_delay_secs < p.min_delay_secs
        {
            return fail("pacing delays must satisfy 0 <= min_delay_secs <= max_delay_secs");
        }
        let t = &self.timeouts;
        if [t.provider_secs, t.playback_secs, t.join_secs]
            .iter()
            .any(|s| !s.is_finite() || *s <= 0.0)
        {
            return fail("timeouts must be positive numbers of seconds");
        }
        if self.judge.diversity_n == 0 {
            return fail("judge.diversity_n must be at least 1");
        }
        Ok(())
    }

    /// Profile for one side of the debate.
    pub fn agent(&self, role: Role) -> &AgentProfile {
        match role {
            Role::Pros => &self.agents.pros,
            Role::Cons => &self.agents.cons,
        }
    }

    /// Get the system prompt for a side, with placeholders replaced.
    pub fn prompt_for(&self, role: Role) -> String {
        let me = self.agent(role);
        let opponent = self.agent(role.other());

        me.prompt
            .replace("{name}", &me.name)
            .replace("{opponent_name}", &opponent.name)
    }

    /// The opening announcement for a topic.
    pub fn topic_announcement(&self, topic: &str) -> String {
        self.debate.topic_template.replace("{topic}", topic.trim())
    }
}

impl Default for Config {
    fn default() -> Self {
        default_config()
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        debate: DebateSettings::default(),
        registry: RegistrySettings::default(),
        pacing: PacingSettings::default(),
        timeouts: TimeoutSettings::default(),
        supervision: SupervisionSettings::default(),
        judge: JudgeSettings::default(),
        agents: AgentsConfig::default(),
    }
}

const DEFAULT_PROS_PROMPT: &str = "You are {name}. You will take a position in favor of the given topic \
and debate {opponent_name} in Korean. Counter the opposing viewpoint and assert your own opinion. \
Your response should not exceed 5 lines. Output only your spoken words.";

const DEFAULT_CONS_PROMPT: &str = "You are {name}. You will take a position against the given topic \
and debate {opponent_name} in Korean. Counter the opposing viewpoint and assert your own opinion. \
Your response should not exceed 5 lines. Output only your spoken words.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_canonical_values() {
        let config = default_config();
        assert_eq!(config.debate.max_turns, 10);
        assert_eq!(config.debate.log_capacity, 100);
        assert_eq!(config.debate.similarity_threshold, 60);
        assert_eq!(config.registry.code_length, 2);
        assert_eq!(config.pacing.alpha, 1.0);
        assert_eq!(config.pacing.beta, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_str(
            r#"
            [debate]
            max_turns = 4

            [pacing]
            alpha = 2.0
            beta = 5.0
            min_delay_secs = 0.005
            max_delay_secs = 0.025
            "#,
        )
        .unwrap();

        assert_eq!(config.debate.max_turns, 4);
        assert_eq!(config.debate.log_capacity, 100);
        assert_eq!(config.pacing.beta, 5.0);
        assert_eq!(config.agents.cons.name, "gemini");
    }

    #[test]
    fn test_agent_tables_parse() {
        let config = Config::from_str(
            r#"
            [agents.pros]
            name = "alpha"
            model = "m1"
            voice = "af_sky"
            prompt = "{name} vs {opponent_name}"

            [agents.cons]
            name = "beta"
            model = "m2"
            api_base = "http://localhost:11434/v1"
            voice = "bm_george"
            prompt = "against"
            "#,
        )
        .unwrap();

        assert_eq!(config.prompt_for(Role::Pros), "alpha vs beta");
        assert_eq!(config.agent(Role::Cons).api_base.as_deref(), Some("http://localhost:11434/v1"));
        assert_eq!(config.agent(Role::Cons).max_tokens, 400);
    }

    #[test]
    fn test_rejects_inverted_pacing_bounds() {
        let err = Config::from_str(
            r#"
            [pacing]
            min_delay_secs = 0.5
            max_delay_secs = 0.1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, DebateError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_non_finite_pacing() {
        for (min, max) in [(f64::NAN, 0.1), (0.0, f64::INFINITY), (0.0, f64::NAN)] {
            let mut config = default_config();
            config.pacing.min_delay_secs = min;
            config.pacing.max_delay_secs = max;
            assert!(
                matches!(config.validate(), Err(DebateError::ConfigError(_))),
                "accepted min={min} max={max}"
            );
        }
    }

    #[test]
    fn test_sample_file_matches_defaults() {
        let sample = Config::from_str(include_str!("../../../debateroom.toml")).unwrap();
        let defaults = default_config();

        assert_eq!(sample.debate.max_turns, defaults.debate.max_turns);
        assert_eq!(sample.debate.topic_template, defaults.debate.topic_template);
        assert_eq!(sample.timeouts.playback_secs, defaults.timeouts.playback_secs);
        assert_eq!(sample.judge.model, defaults.judge.model);
        assert_eq!(sample.judge.diversity_n, defaults.judge.diversity_n);
        for role in Role::BOTH {
            assert_eq!(sample.prompt_for(role), defaults.prompt_for(role));
            assert_eq!(sample.agent(role).voice, defaults.agent(role).voice);
        }
    }

    #[test]
    fn test_topic_announcement() {
        let config = default_config();
        assert_eq!(
            config.topic_announcement(" 학교의 역할 "),
            "토론 주제는 학교의 역할 입니다."
        );
    }
}
