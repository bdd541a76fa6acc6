/// Why a frame could not be queued for a connection.
///
/// Both cases are expected during normal operation and are skipped by the
/// relay; nothing is retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is closing or closed.
    #[error("connection lost")]
    ConnectionLost,

    /// The connection's outbound queue is full.
    #[error("send queue full")]
    QueueFull,

    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl SendError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionLost => "connection_lost",
            Self::QueueFull => "queue_full",
            Self::Encode(_) => "encode",
        }
    }
}
