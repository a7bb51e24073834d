/*!
 * Error types for the tmqe pipeline.
 *
 * Every component raises its own typed error, and every typed error can be
 * classified into one of three recovery classes:
 * - `Transient`: network/timeout-class failures, retried with backoff
 * - `Resource`: accelerator capacity exhaustion, retried after backoff
 * - `Permanent`: invalid input, missing configuration, unknown model ids
 */

use thiserror::Error;

/// Recovery class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network or timeout class, safe to retry
    Transient,
    /// Capacity exhaustion, retry after backoff or a smaller batch
    Resource,
    /// Never retried, surfaced immediately
    Permanent,
}

impl ErrorClass {
    /// Whether a retry policy may retry this class.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Resource)
    }
}

/// Errors that know their own recovery class.
pub trait Classify {
    /// Classify this error for retry purposes.
    fn class(&self) -> ErrorClass;
}

/// Markers that identify an out-of-memory condition in backend messages.
const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "outofmemory",
    "cuda error: out of memory",
    "insufficient memory",
    "oom",
];

/// Check whether a free-text backend message describes memory exhaustion.
pub fn looks_like_oom(message: &str) -> bool {
    let lower = message.to_lowercase();
    OOM_MARKERS.iter().any(|marker| {
        if *marker == "oom" {
            lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == "oom")
        } else {
            lower.contains(marker)
        }
    })
}

/// Errors raised by the resource manager
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Not enough accelerator memory for the requested load
    #[error("Insufficient resources to load {model_id}: requires {required_gb:.2} GB, {available_gb:.2} GB available")]
    InsufficientResource {
        /// Model that was about to be loaded
        model_id: String,
        /// Estimated size of the load
        required_gb: f64,
        /// Memory available after the safety margin
        available_gb: f64,
    },

    /// The accelerator could not be queried
    #[error("Accelerator unavailable: {0}")]
    DeviceUnavailable(String),
}

impl Classify for ResourceError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Resource
    }
}

/// Errors raised by the model registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The model id is unknown or the registry is misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fetching the artifact failed or produced nothing usable
    #[error("Failed to fetch {model_id}: {reason}")]
    Fetch {
        /// Model being fetched
        model_id: String,
        /// What went wrong
        reason: String,
    },

    /// Fetching the artifact took too long
    #[error("Fetching {model_id} timed out after {seconds}s")]
    Timeout {
        /// Model being fetched
        model_id: String,
        /// Timeout that elapsed
        seconds: u64,
    },

    /// Filesystem failure around the cache directory
    #[error("Model cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata store could not be read or written
    #[error("Model metadata error: {0}")]
    Metadata(String),
}

impl Classify for RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Fetch { .. } | RegistryError::Timeout { .. } => ErrorClass::Transient,
            RegistryError::Configuration(_)
            | RegistryError::Io(_)
            | RegistryError::Metadata(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors raised while generating candidates
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Connection-level failure talking to the backend
    #[error("Generation backend unreachable: {0}")]
    Network(String),

    /// A single attempt exceeded its time budget
    #[error("Generation attempt timed out after {0}s")]
    Timeout(u64),

    /// The backend answered with an error
    #[error("Generation backend error (status {status:?}): {message}")]
    Backend {
        /// HTTP-like status code, when the backend has one
        status: Option<u16>,
        /// Error message from the backend
        message: String,
    },

    /// Capacity gate refused the model load
    #[error(transparent)]
    InsufficientResource(#[from] ResourceError),

    /// The request itself is invalid (empty source, unknown template)
    #[error("Invalid generation request: {0}")]
    InvalidRequest(String),

    /// No generation backend is configured or reachable by design
    #[error("Generation unavailable: {0}")]
    Unavailable(String),
}

impl Classify for GenerationError {
    fn class(&self) -> ErrorClass {
        match self {
            GenerationError::Network(_) | GenerationError::Timeout(_) => ErrorClass::Transient,
            GenerationError::InsufficientResource(_) => ErrorClass::Resource,
            GenerationError::Backend { status, message } => {
                if looks_like_oom(message) {
                    return ErrorClass::Resource;
                }
                match status {
                    Some(429) => ErrorClass::Transient,
                    Some(code) if *code >= 500 => ErrorClass::Transient,
                    Some(_) => ErrorClass::Permanent,
                    None => ErrorClass::Transient,
                }
            }
            GenerationError::InvalidRequest(_) | GenerationError::Unavailable(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

/// Errors raised by scoring backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// The backend failed to produce a score
    #[error("Scoring backend error: {0}")]
    Backend(String),

    /// Inputs that cannot be scored (empty vectors, mismatched dimensions)
    #[error("Invalid scoring input: {0}")]
    InvalidInput(String),
}

impl Classify for ScoringError {
    fn class(&self) -> ErrorClass {
        match self {
            ScoringError::Backend(message) if looks_like_oom(message) => ErrorClass::Resource,
            ScoringError::Backend(_) => ErrorClass::Transient,
            ScoringError::InvalidInput(_) => ErrorClass::Permanent,
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from the resource manager
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Error from the model registry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error from candidate generation
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Error from scoring
    #[error("Scoring error: {0}")]
    Scoring(#[from] ScoringError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Classify for AppError {
    fn class(&self) -> ErrorClass {
        match self {
            AppError::Resource(e) => e.class(),
            AppError::Registry(e) => e.class(),
            AppError::Generation(e) => e.class(),
            AppError::Scoring(e) => e.class(),
            AppError::File(_) | AppError::Config(_) | AppError::Unknown(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(format!("{:#}", error))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
