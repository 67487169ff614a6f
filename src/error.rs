//! Crate-wide error type.

/// Convenience alias used throughout the crate.
pub type OsdResult<T> = Result<T, OsdError>;

/// All failure modes surfaced by the crate.
///
/// Truncated trailing records are deliberately *not* represented here: a
/// short read is the normal end-of-capture condition, not an error.
#[derive(thiserror::Error, Debug)]
pub enum OsdError {
    /// Unrecognized capture version or signature.
    #[error("format error: {0}")]
    Format(String),

    /// Invalid input or configuration supplied by the caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// Tile sheet failed to load or decode; fatal to atlas construction.
    #[error("image load error: {0}")]
    ImageLoad(String),

    /// Frame sink / encoder failure.
    #[error("encode error: {0}")]
    Encode(String),

    /// Wrapped I/O and context errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OsdError {
    /// Build a [`OsdError::Format`] from a message.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Build a [`OsdError::Validation`] from a message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`OsdError::ImageLoad`] from a message.
    pub fn image_load(msg: impl Into<String>) -> Self {
        Self::ImageLoad(msg.into())
    }

    /// Build a [`OsdError::Encode`] from a message.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
