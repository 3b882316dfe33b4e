//! DebateRoom Core Library
//!
//! Runs live debates between two AI agents: per-session turn taking, paced
//! incremental reveal, interruption by user input, and playback-gated
//! hand-off between the sides, and a judged evaluation once a debate ends.

pub mod coalesce;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod factory;
pub mod message;
pub mod model;
pub mod pacing;
pub mod participant;
pub mod registry;
pub mod session;
pub mod similarity;
pub mod tts;
pub mod worker;

pub use coalesce::{Decision, InputKind};
pub use config::{Config, default_config};
pub use error::{BusError, DebateError, ProviderError, SynthesisError};
pub use evaluate::{DebateEvaluator, Evaluation, Verdict};
pub use events::{EventBus, InboundEvent, SessionEvent, SharedEventBus, Topic};
pub use factory::{AgentFactory, AgentProviders, ProviderFactory};
pub use message::Message;
pub use model::{ModelClient, OpenAiModel};
pub use participant::{AgentProfile, Role};
pub use registry::SessionRegistry;
pub use session::Session;
pub use similarity::{EditRatio, SimilarityScorer};
pub use tts::{KokoroTts, SharedEngine, TtsClient};
pub use worker::WorkerState;
