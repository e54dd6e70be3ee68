use crate::archive::ArchiveError;
use crate::model::{BookingId, Role, Status, TableId};

#[derive(Debug)]
pub enum EngineError {
    TableOccupied(TableId),
    TableLocked(TableId),
    Forbidden {
        role: Role,
        action: &'static str,
    },
    BookingNotFound(BookingId),
    InvalidTransition {
        booking_id: BookingId,
        status: Status,
        action: &'static str,
    },
    ReasonRequired,
    CannotSplitLastTable(TableId),
    ConfirmationRequired,
    UnknownTable(TableId),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    Archive(ArchiveError),
    WalError(String),
}

impl EngineError {
    /// Stable kind name surfaced to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::TableOccupied(_) => "TableOccupied",
            EngineError::TableLocked(_) => "TableLocked",
            EngineError::Forbidden { .. } => "Forbidden",
            EngineError::BookingNotFound(_) => "BookingNotFound",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::ReasonRequired => "ReasonRequired",
            EngineError::CannotSplitLastTable(_) => "CannotSplitLastTable",
            EngineError::ConfirmationRequired => "ConfirmationRequired",
            EngineError::UnknownTable(_) => "UnknownTable",
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::Archive(_) => "ArchiveError",
            EngineError::WalError(_) => "WalError",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::TableOccupied(t) => write!(f, "table already occupied: {t}"),
            EngineError::TableLocked(t) => write!(f, "table is locked: {t}"),
            EngineError::Forbidden { role, action } => {
                write!(f, "role {role} may not {action}")
            }
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::InvalidTransition {
                booking_id,
                status,
                action,
            } => write!(f, "cannot {action} booking {booking_id} in status {status}"),
            EngineError::ReasonRequired => write!(f, "a cancellation reason is required"),
            EngineError::CannotSplitLastTable(t) => {
                write!(f, "cannot split {t}: it is the booking's last table")
            }
            EngineError::ConfirmationRequired => write!(f, "closing a table must be confirmed"),
            EngineError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Archive(e) => write!(f, "{e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Archive(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArchiveError> for EngineError {
    fn from(e: ArchiveError) -> Self {
        EngineError::Archive(e)
    }
}
