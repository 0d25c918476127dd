//! HTTP Error Mapping
//!
//! Every failure leaves the server as `{"error": <code>}` plus, where it is
//! safe to show, a short detail. Internals are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use givers_donations::DonationError;

/// Longest provider message returned to a client
const UPSTREAM_MESSAGE_CHARS: usize = 200;

/// Validation reasons reported as 400 rather than 422
const BAD_REQUEST_REASONS: &[&str] = &["donor_token_missing", "invalid_payload"];

#[derive(Debug)]
pub struct ApiError(pub DonationError);

impl From<DonationError> for ApiError {
    fn from(err: DonationError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DonationError::ValidationFailed(reason)
                if BAD_REQUEST_REASONS.contains(&reason.as_str()) =>
            {
                StatusCode::BAD_REQUEST
            }
            DonationError::ValidationFailed(_) | DonationError::UpstreamRejected(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DonationError::NotFound(_) => StatusCode::NOT_FOUND,
            DonationError::Forbidden => StatusCode::FORBIDDEN,
            DonationError::Unauthorized => StatusCode::UNAUTHORIZED,
            DonationError::Transport(_) | DonationError::PaymentsDisabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DonationError::Conflict(_) => StatusCode::CONFLICT,
            DonationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        let body = match &self.0 {
            DonationError::ValidationFailed(reason) => json!({"error": code, "reason": reason}),
            DonationError::UpstreamRejected(message) => {
                let message: String = message.chars().take(UPSTREAM_MESSAGE_CHARS).collect();
                json!({"error": code, "message": message})
            }
            DonationError::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                json!({"error": code})
            }
            DonationError::Transport(detail) => {
                tracing::warn!(detail = %detail, "Transport failure");
                json!({"error": code})
            }
            _ => json!({"error": code}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: DonationError) -> StatusCode {
        ApiError(err).status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status(DonationError::ValidationFailed("amount_out_of_range".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(DonationError::ValidationFailed("donor_token_missing".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(DonationError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status(DonationError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(DonationError::PaymentsDisabled),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(DonationError::Conflict("x".into())), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_upstream_message_is_truncated() {
        let response =
            ApiError(DonationError::UpstreamRejected("x".repeat(500))).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "upstream_rejected");
        assert_eq!(json["message"].as_str().unwrap().len(), 200);
    }
}
