//! Error handling for the System Pulse sampler crate.

/// A specialized `Result` type for System Pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;

/// The main error type for System Pulse sampling operations.
///
/// None of these ever cross the fail-soft sampling contracts; they exist so
/// internal reads can propagate with `?` and so tick failures can be logged
/// and recorded in the sampler health.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pseudo-file the sampler depends on does not exist
    #[error("Counter not available: {path}")]
    Unavailable { path: String },

    /// A pseudo-file held something other than what was expected
    #[error("Failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The estimator could not produce a value for this tick
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// The background worker could not be started or joined
    #[error("Worker error: {0}")]
    Worker(String),
}

impl PulseError {
    /// Create a new parse error
    pub fn parse_error(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a new unavailable-counter error
    pub fn unavailable(path: impl Into<String>) -> Self {
        Self::Unavailable { path: path.into() }
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new sampler error
    pub fn sampler_error(msg: impl Into<String>) -> Self {
        Self::Sampler(msg.into())
    }

    /// Create a new worker error
    pub fn worker_error(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether the error means "this counter is not exposed here" rather
    /// than a genuine failure.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}
