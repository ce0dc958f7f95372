pub mod gemini;
pub mod sse;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

use crate::error::ChatError;
use crate::transcript::Message;

/// Ordered text fragments of one streamed reply
pub type ChunkStream = BoxStream<'static, Result<String, ChatError>>;

/// The hosted model, seen from the conversation core.
///
/// Implemented by [`GeminiClient`] for real use and by scripted fakes in tests.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Stream a reply to `prompt`. `prior_turns` holds earlier turns only,
    /// never the prompt itself.
    async fn stream_completion(
        &self,
        prompt: &str,
        prior_turns: &[Message],
    ) -> Result<ChunkStream, ChatError>;

    /// Ask for a JSON document matching `schema`. The returned text is not
    /// validated here.
    async fn structured_completion(&self, prompt: &str, schema: &Value) -> Result<String, ChatError>;
}
