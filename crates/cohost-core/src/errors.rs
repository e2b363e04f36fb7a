use std::time::Duration;

/// Typed errors for the generation capability boundary.
/// Every variant is recovered locally by the relay; none is fatal to the process.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability not initialized")]
    NotReady,
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("model not downloaded: {0}")]
    NotDownloaded(String),
    #[error("no model loaded")]
    NoModelLoaded,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(String),
}

impl CapabilityError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::UnknownModel(_) => "unknown_model",
            Self::NotDownloaded(_) => "not_downloaded",
            Self::NoModelLoaded => "no_model_loaded",
            Self::Backend(_) => "backend",
            Self::Http(_) => "http",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
        }
    }

    /// Whether the caller could reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backend(_) | Self::Http(_) | Self::Timeout(_) | Self::NotReady
        )
    }
}
