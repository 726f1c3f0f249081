use super::Attachment;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation was cancelled")]
    Cancelled,
    #[error("Generation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Generation API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),
}

impl GenerationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Sends exactly one request. Resolves with [`GenerationError::Cancelled`]
    /// if `cancel` fires before the reply arrives.
    async fn generate(
        &self,
        prompt: &str,
        attachment: Option<&Attachment>,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError>;
}
