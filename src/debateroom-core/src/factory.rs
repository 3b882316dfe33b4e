//! Provider construction, done once per side when a session starts.

use crate::config::{Config, JudgeSettings};
use crate::error::DebateError;
use crate::evaluate::{DebateEvaluator, JUDGE_SYSTEM_PROMPT};
use crate::model::{ModelClient, OpenAiModel};
use crate::participant::{AgentProfile, Role};
use crate::tts::{SharedEngine, TtsClient};

/// The two capabilities one worker owns.
pub struct AgentProviders {
    pub model: Box<dyn ModelClient>,
    pub tts: Box<dyn TtsClient>,
}

pub trait AgentFactory: Send + Sync {
    fn build(&self, role: Role, config: &Config) -> Result<AgentProviders, DebateError>;
}

/// OpenAI-compatible chat models with kokoro voices.
pub struct ProviderFactory {
    engine: SharedEngine,
    api_base: String,
    api_key: String,
}

impl ProviderFactory {
    pub fn new(engine: SharedEngine, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            engine,
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    /// Fail early on voices the engine does not ship.
    pub fn validate(&self, config: &Config) -> Result<(), DebateError> {
        for role in Role::BOTH {
            self.engine.validate_voice(&config.agent(role).voice)?;
        }
        Ok(())
    }

    /// Evaluator backed by the configured judge model.
    pub fn judge(&self, settings: &JudgeSettings) -> Result<DebateEvaluator, DebateError> {
        let profile = AgentProfile {
            api_base: settings.api_base.clone(),
            max_tokens: settings.max_tokens,
            ..AgentProfile::new("judge", &settings.model, "")
        };
        let model = OpenAiModel::new(
            &profile,
            JUDGE_SYSTEM_PROMPT.to_string(),
            &self.api_base,
            &self.api_key,
        )?;
        Ok(DebateEvaluator::new(Box::new(model), settings.diversity_n))
    }
}

impl AgentFactory for ProviderFactory {
    fn build(&self, role: Role, config: &Config) -> Result<AgentProviders, DebateError> {
        let profile = config.agent(role);
        let model = OpenAiModel::new(profile, config.prompt_for(role), &self.api_base, &self.api_key)?;
        let tts = self.engine.voice(&profile.voice)?;

        Ok(AgentProviders {
            model: Box::new(model),
            tts: Box::new(tts),
        })
    }
}
