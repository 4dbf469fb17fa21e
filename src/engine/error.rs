use ulid::Ulid;

use crate::model::{AppointmentStatus, Ms};
use crate::time::{format_instant, TimeError};

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    LimitExceeded(&'static str),
    /// A blocking appointment already starts at this instant.
    SlotTaken(Ms),
    SlotBlocked { start: Ms, block_out: Ulid },
    Forbidden(&'static str),
    NotFound(Ulid),
    CannotCancel(AppointmentStatus),
    WalError(String),
}

/// Caller-facing classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Forbidden,
    NotFound,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::SlotTaken(_)
            | EngineError::SlotBlocked { .. }
            | EngineError::CannotCancel(_) => ErrorKind::Conflict,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::SlotTaken(start) => {
                write!(f, "time slot {} is no longer available", format_instant(*start))
            }
            EngineError::SlotBlocked { start, block_out } => write!(
                f,
                "time slot {} is blocked (block-out {block_out})",
                format_instant(*start)
            ),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::CannotCancel(status) => {
                write!(f, "appointment cannot be cancelled in status {status}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
