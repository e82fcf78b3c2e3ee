use thiserror::Error;

#[derive(Error, Debug)]
pub enum StiError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique conflict: {0}")]
    UniqueConflict(String),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StiResult<T> = Result<T, StiError>;

impl StiError {
    /// Stable HTTP status mapping for the REST envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::UniqueConflict(_) | Self::ForeignKey(_) => 409,
            Self::Upstream(_) => 503,
            Self::UpstreamTimeout => 504,
            Self::Storage(_) | Self::Serialization(_) | Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}
