use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Date range invalid: end not after start.
    InvalidRange,
    /// Requested dates clash with an existing booking (its id).
    Unavailable(Ulid),
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Booking reached a review step without a submitted form.
    FormMissing(Ulid),
    /// Vehicle still has slot-holding bookings.
    HasActiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange => write!(f, "invalid range: end date must be after start date"),
            EngineError::Unavailable(id) => write!(f, "dates not available: conflicts with booking {id}"),
            EngineError::IllegalTransition { from, to } => {
                write!(f, "illegal transition: {} -> {}", from.as_str(), to.as_str())
            }
            EngineError::FormMissing(id) => write!(f, "no form submitted for booking {id}"),
            EngineError::HasActiveBookings(id) => {
                write!(f, "cannot remove vehicle {id}: active bookings exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
