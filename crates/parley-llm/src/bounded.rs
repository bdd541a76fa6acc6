use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tracing::warn;

use parley_core::errors::GenerationError;
use parley_core::generator::SuggestionGenerator;
use parley_telemetry::metrics::{
    GENERATION_DURATION_SECONDS, GENERATION_ERRORS_TOTAL, GENERATION_REQUESTS_TOTAL,
};

/// Wraps a generator with a hard deadline per call.
///
/// - A call that outlives `timeout` is dropped and reported as
///   [`GenerationError::Timeout`]; dropping it releases the request
/// - Failures are returned as-is: no retries, no circuit breaker
/// - Every call is counted and timed
pub struct BoundedGenerator<G: SuggestionGenerator> {
    inner: G,
    timeout: Duration,
}

impl<G: SuggestionGenerator> BoundedGenerator<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: SuggestionGenerator> SuggestionGenerator for BoundedGenerator<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let backend = self.inner.name().to_string();
        counter!(GENERATION_REQUESTS_TOTAL, "backend" => backend.clone()).increment(1);
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.inner.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        };

        histogram!(GENERATION_DURATION_SECONDS, "backend" => backend.clone())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            counter!(GENERATION_ERRORS_TOTAL, "backend" => backend, "kind" => e.error_kind())
                .increment(1);
            warn!(
                model = self.inner.model(),
                error_kind = e.error_kind(),
                error = %e,
                "generation failed"
            );
        }
        result
    }
}
