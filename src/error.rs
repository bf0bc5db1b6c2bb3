use crate::types::BookingStatus;
use uuid::Uuid;

/// Errors returned by the booking services.
///
/// Every variant maps to one of the outcomes a client has to tell apart:
/// pick another slot, retry, fix the input or contact support.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("Slot {0} is already booked")]
    Conflict(Uuid),

    #[error("Booking {booking_id} can't move from {from} to {to}")]
    InvalidStateTransition {
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Receipt upload failed: {0}")]
    UploadFailure(String),

    #[error("Schedule lookup failed for resource {resource_id}: {reason}")]
    ScheduleLookupFailure { resource_id: Uuid, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Short machine readable classification used by HTTP clients.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Conflict(_) => "conflict",
            BookingError::InvalidStateTransition { .. } => "invalid_state",
            BookingError::UploadFailure(_) => "retry",
            BookingError::Validation(_) => "validation",
            BookingError::NotFound(_) => "not_found",
            BookingError::ScheduleLookupFailure { .. } | BookingError::Storage(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::UploadFailure(_))
    }
}

impl From<diesel::result::Error> for BookingError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => BookingError::NotFound("Record".into()),
            other => BookingError::Storage(other.to_string()),
        }
    }
}
