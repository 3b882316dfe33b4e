//! Text-generation providers.
//!
//! A [`ModelClient`] owns one side's conversation history and turns a trigger
//! into that side's next statement.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::participant::AgentProfile;

#[async_trait]
pub trait ModelClient: Send {
    /// Append `trigger` as the opponent's (or user's) turn and produce a reply.
    /// The reply is not part of the history until it is recorded.
    async fn generate(&mut self, trigger: &str) -> Result<String, ProviderError>;

    /// Record a reply that was revealed in full.
    fn record_reply(&mut self, _text: &str) {}

    /// Record the shown prefix of a reply that was cut off mid-reveal.
    fn record_partial(&mut self, text: &str) {
        self.record_reply(text);
    }
}

/// Chat-completions client for any OpenAI-compatible API.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    history: Vec<ChatCompletionRequestMessage>,
}

impl OpenAiModel {
    const MAX_RETRIES: u32 = 3;
    const MAX_EMPTY_RETRIES: u32 = 3;

    pub fn new(
        profile: &AgentProfile,
        system_prompt: String,
        api_base: &str,
        api_key: &str,
    ) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Http(format!("Failed to create HTTP client: {}", e)))?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(profile.api_base.as_deref().unwrap_or(api_base));

        let mut history = Vec::new();
        if !system_prompt.trim().is_empty() {
            history.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: system_prompt.into(),
                    name: None,
                },
            ));
        }

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            model: profile.model.clone(),
            max_tokens: profile.max_tokens,
            history,
        })
    }

    fn push_assistant(&mut self, text: &str) {
        self.history.push(ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessage {
                content: Some(text.to_string().into()),
                name: None,
                tool_calls: None,
                refusal: None,
                audio: None,
                function_call: None,
            },
        ));
    }

    /// One completion, retried with exponential backoff on API errors.
    async fn complete(&self) -> Result<String, ProviderError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .messages(self.history.clone())
            .build()?;

        let mut last_error = None;

        for attempt in 0..Self::MAX_RETRIES {
            if attempt > 0 {
                // 2s, 4s
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    return Ok(response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default());
                }
                Err(e) => {
                    warn!(model = %self.model, attempt = attempt + 1, error = %e, "completion failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => ProviderError::from(e),
            None => ProviderError::Http("Unknown API error after retries".to_string()),
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiModel {
    async fn generate(&mut self, trigger: &str) -> Result<String, ProviderError> {
        self.history.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: trigger.to_string().into(),
                name: None,
            },
        ));

        for attempt in 0..Self::MAX_EMPTY_RETRIES {
            let response = sanitize_response(&self.complete().await?);
            if !response.is_empty() {
                return Ok(response);
            }
            debug!(model = %self.model, attempt = attempt + 1, "empty response, retrying");
        }

        Err(ProviderError::EmptyResponse(Self::MAX_EMPTY_RETRIES))
    }

    fn record_reply(&mut self, text: &str) {
        self.push_assistant(text);
    }
}

/// Sanitize AI response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>, etc.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratchpad",
        "analysis",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    // Orphaned opening/closing tags
    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    result = result.replace('*', "");

    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}
