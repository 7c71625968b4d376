/**
 * Error Conversion
 *
 * `IntoResponse` for `BackendError`, so handlers can return it directly.
 *
 * # Response Format
 *
 * ```json
 * {
 *   "error": { "code": "message_not_found", "message": "message not found" },
 *   "status": 404
 * }
 * ```
 *
 * Internal errors are logged with their cause; the response only carries
 * the generic code and message.
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::backend::error::types::BackendError;

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let BackendError::Internal { cause } = &self {
            tracing::error!(cause = %cause, "[HTTP] Internal error");
        } else if status != StatusCode::NOT_FOUND {
            tracing::debug!(code = self.code(), status = status.as_u16(), "[HTTP] Request rejected");
        }

        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            },
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = BackendError::channel_not_found().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"]["code"], "channel_not_found");
        assert_eq!(json["status"], 404);
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let response = BackendError::internal("SELECT * FROM secrets").into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("secrets"));
        assert!(text.contains("internal_error"));
    }
}
