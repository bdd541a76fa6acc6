use async_trait::async_trait;

use crate::errors::GenerationError;

/// An asynchronous text-generation backend.
///
/// Implementations may take seconds to answer. Callers run them on their own
/// task and never on the path that relays messages.
#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Send `prompt` and return the raw completion text.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// The prompt asking for replies to `content`, said by `sender`.
pub fn suggestion_prompt(sender: &str, content: &str) -> String {
    format!(
        "A person named '{sender}' said to me '{content}'. Numerically list 3 extremely brief responses."
    )
}
