use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::errors::GenerationError;
use parley_core::generator::SuggestionGenerator;

/// Pre-programmed responses for deterministic testing without a backend.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this completion text.
    Text(String),
    /// Fail the call.
    Error(GenerationError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn unavailable(reason: &str) -> Self {
        Self::Error(GenerationError::Unavailable(reason.to_string()))
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock generator that answers calls from a script.
///
/// Sequential mode hands out responses in call order and fails once the
/// script runs out. Repeating mode answers every call with the same response.
pub struct MockGenerator {
    responses: Vec<MockResponse>,
    repeat: bool,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            repeat: false,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: MockResponse) -> Self {
        Self {
            responses: vec![response],
            repeat: true,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_response(&self) -> Option<MockResponse> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.repeat {
            self.responses.first().cloned()
        } else {
            self.responses.get(idx).cloned()
        }
    }
}

#[async_trait]
impl SuggestionGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        match self.next_response() {
            Some(response) => resolve_response(response).await,
            None => Err(GenerationError::Unavailable(format!(
                "MockGenerator: no response configured for call {}",
                self.call_count() - 1
            ))),
        }
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, GenerationError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
