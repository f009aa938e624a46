use thiserror::Error;

/// Errors surfaced by the host-facing API.
///
/// Feed handlers never return these: missing agents, missing sessions and
/// malformed payloads inside handlers are silent no-ops by contract.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Feed error: {0}")]
    Feed(String),
}

pub type GridResult<T> = Result<T, GridError>;
