use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    #[error("serialization error: {0}")]
    Serialization(String),
}
