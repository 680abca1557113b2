//! Error types for runq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid runner scope: {0}")]
    InvalidScope(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("namespace hierarchy lookup failed: {0}")]
    Hierarchy(String),

    #[error("queue backend unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;
