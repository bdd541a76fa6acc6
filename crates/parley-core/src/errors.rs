use std::time::Duration;

/// Failure of a single text-generation request.
///
/// Raw model output is never an error here, however odd it looks. Whether
/// it yields usable suggestions is decided by [`crate::SuggestionBatch`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Map a non-success HTTP status from the backend.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        if body.is_empty() {
            Self::Unavailable(format!("backend returned status {status}"))
        } else {
            Self::Unavailable(format!("backend returned status {status}: {body}"))
        }
    }
}
