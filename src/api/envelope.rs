//! Response envelope.
//!
//! Every endpoint answers `{success, data, error}`; error fields never
//! leak into `data`. Errors carry a stable code, a human message and a
//! correlation id, never a stack trace.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UpstreamUnavailable,
    CircuitOpen,
    RateLimited,
    UnknownPropCategory,
    InsufficientPayoutData,
    CacheUnavailable,
    InvalidParameter,
    Internal,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::UnknownPropCategory => StatusCode::BAD_REQUEST,
            ErrorCode::InsufficientPayoutData => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::CacheUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidParameter => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub correlation_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

/// Success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
}

/// Success envelope with no body (e.g. a lookup miss).
pub fn ok_empty() -> Json<Envelope<serde_json::Value>> {
    Json(Envelope {
        success: true,
        data: None,
        error: None,
    })
}

/// A request-scoped failure, rendered as the envelope with the mapped
/// HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4();
        let body: Envelope<serde_json::Value> = Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: self.code,
                message: self.message,
                correlation_id,
            }),
        };
        (self.code.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_serialize_screaming() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::CircuitOpen).unwrap(),
            "\"CIRCUIT_OPEN\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::InsufficientPayoutData).unwrap(),
            "\"INSUFFICIENT_PAYOUT_DATA\""
        );
    }

    #[test]
    fn test_envelope_never_mixes_error_into_data() {
        let envelope: Envelope<serde_json::Value> = Envelope {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: ErrorCode::Internal,
                message: "boom".to_string(),
                correlation_id: Uuid::new_v4(),
            }),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["error"]["code"], "INTERNAL");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::InvalidParameter.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::CircuitOpen.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorCode::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
