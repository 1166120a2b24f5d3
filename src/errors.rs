use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // ── Gate token errors ──
    #[error("malformed token payload")]
    MalformedToken,

    #[error("token has expired")]
    TokenExpired,

    #[error("token not found or already used")]
    TokenAlreadyUsedOrUnknown,

    #[error("token is not valid for this gate")]
    StationMismatch,

    #[error("exit tokens require a journey reference")]
    MissingJourneyReference,

    // ── Journey errors ──
    #[error("rider already has an active journey")]
    JourneyAlreadyActive,

    #[error("journey not found")]
    JourneyNotFound,

    #[error("journey is not active")]
    JourneyNotActive,

    #[error("no active journey for rider")]
    NoActiveJourney,

    // ── Card / ledger errors ──
    #[error("invalid or inactive metro card")]
    InvalidCard,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("no active metro card for rider")]
    NoActiveCard,

    // ── Station errors ──
    #[error("invalid or inactive station")]
    InvalidStation,

    #[error("station has invalid coordinates")]
    InvalidStationData,

    // ── Payment confirmation errors ──
    #[error("payment signature verification failed")]
    InvalidSignature,

    #[error("payment order not found")]
    OrderNotFound,

    #[error("amount must be positive")]
    InvalidAmount,

    // ── Geofence ──
    #[error("rider is not within the station geofence")]
    OutsideGeofence,

    // ── Infrastructure ──
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable error code, surfaced in HTTP bodies and in
    /// gate `deny` outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MalformedToken => "malformed_token",
            AppError::TokenExpired => "token_expired",
            AppError::TokenAlreadyUsedOrUnknown => "token_already_used_or_unknown",
            AppError::StationMismatch => "station_mismatch",
            AppError::MissingJourneyReference => "missing_journey_reference",
            AppError::JourneyAlreadyActive => "journey_already_active",
            AppError::JourneyNotFound => "journey_not_found",
            AppError::JourneyNotActive => "journey_not_active",
            AppError::NoActiveJourney => "no_active_journey",
            AppError::InvalidCard => "invalid_card",
            AppError::InsufficientBalance => "insufficient_balance",
            AppError::NoActiveCard => "no_active_card",
            AppError::InvalidStation => "invalid_station",
            AppError::InvalidStationData => "invalid_station_data",
            AppError::InvalidSignature => "invalid_signature",
            AppError::OrderNotFound => "order_not_found",
            AppError::InvalidAmount => "invalid_amount",
            AppError::OutsideGeofence => "outside_geofence",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, msg) = match &self {
            AppError::MalformedToken => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.to_string(),
            ),
            AppError::TokenExpired | AppError::TokenAlreadyUsedOrUnknown => (
                StatusCode::UNAUTHORIZED,
                "gate_token_error",
                self.to_string(),
            ),
            AppError::StationMismatch => (
                StatusCode::FORBIDDEN,
                "gate_token_error",
                self.to_string(),
            ),
            AppError::MissingJourneyReference => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.to_string(),
            ),
            AppError::JourneyAlreadyActive | AppError::JourneyNotActive => (
                StatusCode::CONFLICT,
                "journey_error",
                self.to_string(),
            ),
            AppError::JourneyNotFound | AppError::NoActiveJourney => (
                StatusCode::NOT_FOUND,
                "journey_error",
                self.to_string(),
            ),
            AppError::InvalidCard => (
                StatusCode::BAD_REQUEST,
                "card_error",
                self.to_string(),
            ),
            AppError::InsufficientBalance => (
                StatusCode::PAYMENT_REQUIRED,
                "card_error",
                self.to_string(),
            ),
            AppError::NoActiveCard => (
                StatusCode::NOT_FOUND,
                "card_error",
                self.to_string(),
            ),
            AppError::InvalidStation => (
                StatusCode::NOT_FOUND,
                "station_error",
                self.to_string(),
            ),
            AppError::InvalidStationData => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "station_error",
                self.to_string(),
            ),
            AppError::InvalidSignature => (
                StatusCode::BAD_REQUEST,
                "payment_error",
                self.to_string(),
            ),
            AppError::OrderNotFound => (
                StatusCode::NOT_FOUND,
                "payment_error",
                self.to_string(),
            ),
            AppError::InvalidAmount => (
                StatusCode::BAD_REQUEST,
                "payment_error",
                self.to_string(),
            ),
            AppError::OutsideGeofence => (
                StatusCode::FORBIDDEN,
                "gate_token_error",
                self.to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(AppError::TokenExpired.code(), "token_expired");
        assert_eq!(
            AppError::TokenAlreadyUsedOrUnknown.code(),
            "token_already_used_or_unknown"
        );
        assert_eq!(AppError::JourneyAlreadyActive.code(), "journey_already_active");
        assert_eq!(AppError::InsufficientBalance.code(), "insufficient_balance");
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err = AppError::Internal(anyhow::anyhow!("secret connection string"));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
