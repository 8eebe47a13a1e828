use thiserror::Error;

/// Result type for fleetindex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a request was rejected by the API key check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No key header was supplied
    Missing,
    /// A key was supplied but is not on the allow-list
    Invalid,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Missing => write!(f, "Missing API key header (X-API-Key)"),
            AuthFailure::Invalid => write!(f, "Invalid API key"),
        }
    }
}

/// Main error type for fleetindex operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing node weight, missing local file, bad settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node could not be reached
    #[error("Connectivity error on {node}: {message}")]
    Connectivity { node: String, message: String },

    /// Pushing a file to a node failed
    #[error("Transfer error on {node}: {message}")]
    Transfer { node: String, message: String },

    /// Remote process exited non-zero or could not be launched
    #[error("Remote execution error on {node}: {message}")]
    RemoteExecution { node: String, message: String },

    /// Embedding dimension disagrees with the global metadata
    #[error("Dimension mismatch in {source_name}: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        source_name: String,
    },

    /// Writing or atomically replacing merged artifacts failed
    #[error("Merge error: {0}")]
    Merge(String),

    /// Unknown job id or missing artifact
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid credential
    #[error("Authentication error: {0}")]
    Auth(AuthFailure),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON encode/decode failures
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a connectivity error for a node
    pub fn connectivity(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a transfer error for a node
    pub fn transfer(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transfer {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a remote execution error for a node
    pub fn remote_execution(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteExecution {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates a dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize, source: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            expected,
            actual,
            source_name: source.into(),
        }
    }

    /// Creates a merge error
    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge(msg.into())
    }

    /// Creates a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
