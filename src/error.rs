use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Unknown room: {0}")]
    UnknownRoom(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Duplicate message id: {0}")]
    DuplicateMessage(String),
}
