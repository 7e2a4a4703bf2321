//! Error types for subscription decoding

/// Errors from decoding or grouping subscription data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("subscription is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("subscription is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("cannot group an empty endpoint list")]
    EmptyInput,
}

/// Result alias for subscription operations.
pub type Result<T> = std::result::Result<T, Error>;
