use thiserror::Error;

use super::validate::Violation;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("work order {work_order_id} already has an operation at index {index}")]
    DuplicateIndex { work_order_id: String, index: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A scheduling rule refused the change. State is untouched.
    #[error(transparent)]
    Rejected(#[from] Violation),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
