//! Scripted providers and helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use debateroom_core::{
    AgentFactory, AgentProviders, Config, DebateError, EventBus, Message, ModelClient,
    ProviderError, Role, Session, SessionEvent, SessionRegistry, SharedEventBus,
    SimilarityScorer, SynthesisError, Topic, TtsClient, default_config,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted model does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail,
    Panic,
    /// Never returns; only cancellation ends the call.
    Hang,
}

/// One entry of a scripted model's conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    User(String),
    Assistant(String),
}

pub fn user(text: &str) -> Turn {
    Turn::User(text.to_string())
}

pub fn assistant(text: &str) -> Turn {
    Turn::Assistant(text.to_string())
}

/// Per-side record of what a scripted model saw.
#[derive(Default, Clone)]
pub struct ModelLog {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub partials: Arc<Mutex<Vec<String>>>,
    pub history: Arc<Mutex<Vec<Turn>>>,
    script: Arc<Mutex<VecDeque<Step>>>,
}

impl ModelLog {
    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn partials(&self) -> Vec<String> {
        self.partials.lock().unwrap().clone()
    }

    /// The conversation the model would send on its next call.
    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().unwrap().clone()
    }
}

struct ScriptedModel {
    role: Role,
    log: ModelLog,
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&mut self, trigger: &str) -> Result<String, ProviderError> {
        let call = {
            let mut calls = self.log.calls.lock().unwrap();
            calls.push(trigger.to_string());
            calls.len()
        };
        self.log.history.lock().unwrap().push(user(trigger));
        let step = self.log.script.lock().unwrap().pop_front();

        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail) => Err(ProviderError::Http("quota exceeded".to_string())),
            Some(Step::Panic) => panic!("scripted model panic"),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(format!("{} reply {}", self.role, call)),
        }
    }

    fn record_reply(&mut self, text: &str) {
        self.log.history.lock().unwrap().push(assistant(text));
    }

    fn record_partial(&mut self, text: &str) {
        self.log.partials.lock().unwrap().push(text.to_string());
        self.record_reply(text);
    }
}

struct ScriptedTts {
    fail: bool,
}

#[async_trait]
impl TtsClient for ScriptedTts {
    async fn synthesize(&mut self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        if self.fail {
            return Err(SynthesisError::Engine("voice unavailable".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default, Clone)]
pub struct ScriptedFactory {
    pub pros: ModelLog,
    pub cons: ModelLog,
    pub tts_fails: bool,
}

impl ScriptedFactory {
    pub fn log(&self, role: Role) -> &ModelLog {
        match role {
            Role::Pros => &self.pros,
            Role::Cons => &self.cons,
        }
    }
}

impl AgentFactory for ScriptedFactory {
    fn build(&self, role: Role, _config: &Config) -> Result<AgentProviders, DebateError> {
        Ok(AgentProviders {
            model: Box::new(ScriptedModel {
                role,
                log: self.log(role).clone(),
            }),
            tts: Box::new(ScriptedTts { fail: self.tts_fails }),
        })
    }
}

/// Returns queued scores in order, then `fallback`.
pub struct ScriptedScorer {
    scores: Mutex<VecDeque<u8>>,
    fallback: u8,
}

impl ScriptedScorer {
    pub fn new(scores: impl IntoIterator<Item = u8>, fallback: u8) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().collect()),
            fallback,
        }
    }
}

impl SimilarityScorer for ScriptedScorer {
    fn ratio(&self, _a: &str, _b: &str) -> u8 {
        self.scores.lock().unwrap().pop_front().unwrap_or(self.fallback)
    }
}

/// Instant pacing and short timeouts.
pub fn test_config(max_turns: u32) -> Config {
    let mut config = default_config();
    config.debate.max_turns = max_turns;
    config.pacing.min_delay_secs = 0.0;
    config.pacing.max_delay_secs = 0.0;
    config.timeouts.provider_secs = 5.0;
    config.timeouts.playback_secs = 5.0;
    config.timeouts.join_secs = 1.0;
    config
}

pub fn registry(config: Config, factory: &ScriptedFactory) -> SessionRegistry {
    SessionRegistry::new(config, EventBus::new().shared(), Arc::new(factory.clone())).unwrap()
}

/// Acknowledge every finalized response as soon as it is published.
pub fn auto_ack(bus: &SharedEventBus, session: &Arc<Session>) {
    let session = Arc::downgrade(session);
    bus.subscribe(Topic::AgentResponse, move |event| {
        if let (SessionEvent::AgentResponse { message, .. }, Some(session)) = (event, session.upgrade()) {
            session.signal_playback_done(message.role);
        }
        Ok(())
    });
}

/// Collects every event published on `topic`.
pub fn record(bus: &SharedEventBus, topic: Topic) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(topic, move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    seen
}

/// Reveal increments published for `role`, in order.
pub fn reveals(seen: &Arc<Mutex<Vec<SessionEvent>>>, role: Role) -> Vec<Message> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            SessionEvent::AgentMessage { message, .. } if message.role == role => Some(message.clone()),
            _ => None,
        })
        .collect()
}

pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_closed(session: &Session) {
    tokio::time::timeout(Duration::from_secs(5), session.closed())
        .await
        .expect("session did not close");
}
