use thiserror::Error;

/// Opaque error type returned by settlement handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    /// The payment node could not be reached, or a feed it served went away
    /// and could not be re-established.
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    /// The caller supplied parameters the node or the engine rejects outright.
    /// Never retried.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The node has no record of the requested invoice.
    #[error("not found: {0}")]
    NotFound(String),

    /// A registered settlement handler returned an error. The correlation
    /// record is kept so the dispatch can be retried by a later recovery pass.
    #[error("handler `{handler_id}` failed: {source}")]
    CallbackFailed {
        handler_id: String,
        source: BoxError,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rocksdb::Error> for PaymentError {
    fn from(err: rocksdb::Error) -> Self {
        PaymentError::Storage(err.to_string())
    }
}
