// Language model module
// Streaming and non-streaming text generation behind one trait

pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::Result;

pub use openai::OpenAiChatClient;

/// Incremental answer text as produced by the model
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;

    /// Generate the full completion for `prompt`
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generate the completion for `prompt` token by token
    async fn stream(&self, prompt: &str) -> Result<TokenStream>;
}
