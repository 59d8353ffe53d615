use anyhow::Result;
use async_trait::async_trait;

/// One completion call: a system prompt, a user prompt, and delivery options.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Constrain the response to a single JSON object.
    pub json_mode: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// A JSON-object-mode request at the default temperature.
    pub fn json(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: true,
            max_tokens,
            temperature: 0.3,
        }
    }

    /// A free-text request at the default temperature.
    pub fn text(system: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: false,
            max_tokens,
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The single seam to the language model provider. Implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run one completion and return the raw response text
    /// (a JSON string when `json_mode` was requested).
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
