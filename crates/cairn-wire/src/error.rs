//! Wire protocol error types.

/// Errors from encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The envelope is not valid JSON.
    #[error("invalid message JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// A frame declared a body larger than the configured maximum.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The envelope lacks a required protocol field.
    #[error("envelope is missing protocol field {field:?}")]
    MissingField { field: &'static str },

    /// A protocol field holds a value that cannot be parsed.
    #[error("invalid value {value:?} for protocol field {field:?}")]
    InvalidField { field: &'static str, value: String },
}
