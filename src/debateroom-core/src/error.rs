//! Error types for the debate system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("No free session code left ({capacity} codes of length {length})")]
    CodeSpaceExhausted { capacity: usize, length: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

/// Failure of a text-generation provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Model API error: {0}")]
    Api(#[from] async_openai::error::OpenAIError),

    #[error("Model call timed out after {0} seconds")]
    Timeout(f64),

    #[error("Model returned an empty response after {0} attempts")]
    EmptyResponse(u32),

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Failure of a speech-synthesis call.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("TTS engine error: {0}")]
    Engine(String),

    #[error("Unknown voice '{voice}'. Available voices:\n{available}")]
    UnknownVoice { voice: String, available: String },

    #[error("Failed to encode WAV: {0}")]
    Encode(#[from] hound::Error),

    #[error("Synthesis timed out after {0} seconds")]
    Timeout(f64),
}

/// Failure reported by an event bus handler.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}
