use chrono::NaiveDate;
use thiserror::Error;

use super::clock::TimeOfDay;
use crate::models::BookingStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BookingError {
    /// Malformed schedule template. Not retryable.
    #[error("invalid schedule configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested interval overlaps a confirmed or completed booking.
    /// The caller may pick another slot.
    #[error("{date} {start} overlaps booking {conflicting_id}")]
    SlotConflict {
        date: NaiveDate,
        start: TimeOfDay,
        conflicting_id: i64,
    },

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// Transport or persistence failure. Retryable; nothing was committed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),
}

impl BookingError {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidConfiguration(_) => "invalid_configuration",
            BookingError::SlotConflict { .. } => "slot_conflict",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::StoreUnavailable(_) => "store_unavailable",
            BookingError::NotFound(_) => "not_found",
            BookingError::Validation(_) => "validation",
        }
    }

    /// Conflicts (with another slot) and transient store outages. A corrupt
    /// row or a violated constraint fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::SlotConflict { .. }
                | BookingError::StoreUnavailable(StoreError::Unavailable(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_separate_conflict_from_transient_failures() {
        let conflict = BookingError::SlotConflict {
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            start: TimeOfDay::from_hm(10, 0).unwrap(),
            conflicting_id: 7,
        };
        let store = BookingError::from(StoreError::Unavailable("disk I/O error".into()));
        let config = BookingError::InvalidConfiguration("slot interval must be positive".into());

        assert_eq!(conflict.code(), "slot_conflict");
        assert_eq!(store.code(), "store_unavailable");
        assert_eq!(config.code(), "invalid_configuration");
        assert!(conflict.is_retryable());
        assert!(store.is_retryable());
        assert!(!config.is_retryable());
        assert_eq!(conflict.to_string(), "2026-03-02 10:00 overlaps booking 7");
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = BookingError::InvalidTransition {
            from: BookingStatus::Completed,
            to: BookingStatus::Completed,
        };
        assert_eq!(err.to_string(), "cannot move booking from completed to completed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_transient_store_failures_are_retryable() {
        let corrupt = BookingError::from(StoreError::Corrupt("status 'archived'".into()));
        let constraint = BookingError::from(StoreError::Constraint("UNIQUE booking_id".into()));
        assert_eq!(corrupt.code(), "store_unavailable");
        assert!(!corrupt.is_retryable());
        assert!(!constraint.is_retryable());
    }
}
