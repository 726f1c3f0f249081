mod attachment;
mod gemini;
mod types;

use crate::config::Config;
use anyhow::{Context, Result};
pub use attachment::{Attachment, AttachmentKind, AttachmentRef};
pub use gemini::GeminiClient;
use std::sync::Arc;
pub use types::{GenerationError, Generator};

pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let client = GeminiClient::new(&config.api).context("Failed to build Gemini client")?;
    Ok(Arc::new(client))
}
