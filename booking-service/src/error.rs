use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::DatabaseErrorKind;
use serde::Serialize;
use shared::slots::SlotError;
use thiserror::Error;

/// Error taxonomy of the booking core. Everything except the storage variants
/// is recoverable by the caller and maps to a 4xx status; storage failures
/// are retryable and map to 503.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("resource not found")]
    NotFound,
    #[error("supplied PIN does not match")]
    InvalidPin,
    #[error("payment amount must be positive")]
    InvalidAmount,
    #[error("payment exceeds the remaining amount")]
    ExceedsRemaining,
    #[error("another paid booking already occupies this slot")]
    SlotConflict,
    #[error("no working hours known for this provider")]
    ProviderUnavailable,
    #[error("complaint text must not be blank")]
    EmptyComplaint,
    #[error(transparent)]
    Window(#[from] SlotError),
    #[error("storage error: {0}")]
    Storage(diesel::result::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Partial unique index on (provider, service, date, time) over paid rows;
/// the database-level backstop for the payment-completion conflict guard.
pub const PAID_SLOT_UNIQUE_INDEX: &str = "bookings_paid_slot_uniq";

fn is_paid_slot_conflict(kind: &DatabaseErrorKind, constraint: Option<&str>) -> bool {
    matches!(kind, DatabaseErrorKind::UniqueViolation) && constraint == Some(PAID_SLOT_UNIQUE_INDEX)
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        if let diesel::result::Error::DatabaseError(kind, ref info) = err {
            if is_paid_slot_conflict(&kind, info.constraint_name()) {
                return ServiceError::SlotConflict;
            }
        }
        ServiceError::Storage(err)
    }
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::InvalidRequest(_)
            | ServiceError::InvalidPin
            | ServiceError::InvalidAmount
            | ServiceError::ExceedsRemaining
            | ServiceError::EmptyComplaint
            | ServiceError::Window(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound | ServiceError::ProviderUnavailable => StatusCode::NOT_FOUND,
            ServiceError::SlotConflict => StatusCode::CONFLICT,
            ServiceError::Storage(_) | ServiceError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(ServiceError::InvalidPin.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::ExceedsRemaining.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::ProviderUnavailable.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServiceError::SlotConflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ServiceError::Unavailable("pool".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn paid_slot_unique_violation_becomes_slot_conflict() {
        assert!(is_paid_slot_conflict(
            &DatabaseErrorKind::UniqueViolation,
            Some(PAID_SLOT_UNIQUE_INDEX)
        ));
        // Other unique indexes (primary keys) must not masquerade as a
        // slot conflict, nor must other violation kinds on this index.
        assert!(!is_paid_slot_conflict(
            &DatabaseErrorKind::UniqueViolation,
            Some("bookings_pkey")
        ));
        assert!(!is_paid_slot_conflict(&DatabaseErrorKind::UniqueViolation, None));
        assert!(!is_paid_slot_conflict(
            &DatabaseErrorKind::ForeignKeyViolation,
            Some(PAID_SLOT_UNIQUE_INDEX)
        ));
    }

    #[test]
    fn other_diesel_errors_stay_in_the_storage_class() {
        // String error info carries no constraint name.
        let err: ServiceError = diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        )
        .into();
        assert!(matches!(err, ServiceError::Storage(_)));

        let err: ServiceError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, ServiceError::Storage(_)));
    }
}
