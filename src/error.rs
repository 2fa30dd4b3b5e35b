use thiserror::Error;

/// Failure taxonomy shared by the browser backends and the extraction engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("browser transport failure: {0}")]
    Transport(String),

    #[error("cancelled")]
    Cancelled,

    #[error("malformed selector: {0}")]
    MalformedSelector(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Fragments that show up in driver messages once the browser session is gone.
const DEAD_SESSION_SIGNATURES: &[&str] = &[
    "gethandleverifier",
    "chrome not reachable",
    "chrome failed to start",
    "invalid session",
    "session deleted",
    "session not created",
    "disconnected",
    "connection refused",
    "connection reset",
    "broken pipe",
];

impl ExtractError {
    /// Worth another attempt under the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Timeout(_) | Self::Transport(_) | Self::Script(_)
        )
    }

    /// The session itself is broken and must be recreated before retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Classify a raw driver message that did not come with a typed status.
    pub fn from_driver_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let lower = msg.to_lowercase();

        if DEAD_SESSION_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
            Self::Transport(msg)
        } else if lower.contains("invalid selector") || lower.contains("not a valid selector") {
            Self::MalformedSelector(msg)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(msg)
        } else if lower.contains("no such element") || lower.contains("stale element") {
            Self::NotFound(msg)
        } else {
            Self::Script(msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
