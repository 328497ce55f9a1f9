//! Gateway-level errors
//!
//! Failures that happen outside the ZNS facade: routing, backend
//! forwarding, deadlines, and the panic boundary. Rendered as the same
//! error envelope the ZNS surface speaks so clients parse one shape,
//! whichever layer produced the failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use zns::types::ZnsErrorCode;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no channel for '{0}'")]
    UnknownChannel(String),

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("request deadline exceeded")]
    Timeout,

    #[error("backend '{0}' unreachable")]
    BackendUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownChannel(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire-level code stamped into the error envelope.
    pub fn code(&self) -> ZnsErrorCode {
        match self {
            GatewayError::UnknownChannel(_) | GatewayError::PayloadTooLarge => {
                ZnsErrorCode::Unspecified
            }
            GatewayError::Timeout => ZnsErrorCode::Timeout,
            GatewayError::BackendUnavailable(_) => ZnsErrorCode::ResolverUnavailable,
            GatewayError::Internal(_) => ZnsErrorCode::InternalError,
        }
    }

    /// Client-safe message. Internal detail is logged here and never
    /// leaves the process.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.code().as_str(),
                "message": self.public_message(),
                "details": null,
                "resolution_chain": [],
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_mapping() {
        let err = GatewayError::UnknownChannel("nope".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), ZnsErrorCode::Unspecified);

        assert_eq!(
            GatewayError::Timeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(GatewayError::Timeout.code(), ZnsErrorCode::Timeout);

        let backend = GatewayError::BackendUnavailable("wallet".to_string());
        assert_eq!(backend.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(backend.code(), ZnsErrorCode::ResolverUnavailable);
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = GatewayError::Internal("secret stack state".to_string());
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(err.code(), ZnsErrorCode::InternalError);
    }
}
