use thiserror::Error;

/// Core error type for the pool console.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("{message}")]
    Protocol { status: u16, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// User-initiated cancellation. Not a failure.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConsoleError {
    /// Short machine-readable kind, used as a telemetry attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "missing_credential",
            Self::Transport(_) => "transport",
            Self::Protocol { .. } => "protocol",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ConsoleError>;
