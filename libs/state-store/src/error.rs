use thiserror::Error;

/// Errors raised by state store and bus backends.
#[derive(Error, Debug)]
pub enum StateStoreError {
    /// The backend could not be reached.
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be (de)serialized into the requested type.
    #[error("state store value for key '{key}' is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}
