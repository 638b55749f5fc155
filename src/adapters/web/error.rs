//! JSON error responses for the web adapter.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::domain::error::TradedeskError;

/// Every response body is `{"success": true, "data": ...}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
}

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

pub fn status_from_error(err: &TradedeskError) -> StatusCode {
    match err {
        TradedeskError::PositionNotFound { .. } => StatusCode::NOT_FOUND,
        TradedeskError::InvalidOrder { .. }
        | TradedeskError::InvalidParameterRange { .. }
        | TradedeskError::ConfigParse { .. }
        | TradedeskError::ConfigMissing { .. }
        | TradedeskError::ConfigInvalid { .. } => StatusCode::BAD_REQUEST,
        TradedeskError::InsufficientCapital { .. }
        | TradedeskError::InsufficientHistory { .. }
        | TradedeskError::DataGap { .. }
        | TradedeskError::Data { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TradedeskError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
        TradedeskError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TradedeskError> for WebError {
    fn from(err: TradedeskError) -> Self {
        Self::new(status_from_error(&err), err.to_string())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("{} {}", self.status, self.message);
        } else {
            log::debug!("{} {}", self.status, self.message);
        }
        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            status_from_error(&TradedeskError::PositionNotFound { id: 3 }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_from_error(&TradedeskError::invalid_order("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_from_error(&TradedeskError::InsufficientCapital {
                required: 2.0,
                available: 1.0
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_from_error(&TradedeskError::external("exchange", "down")),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn error_envelope_omits_data() {
        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some("nope".to_string()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }
}
