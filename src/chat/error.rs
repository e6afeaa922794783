use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors raised by prompt compilation and input parsing.
///
/// Oracle and storage failures never show up here; those are `anyhow`
/// errors owned by the surrounding glue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
