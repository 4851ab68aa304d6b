//! KasError to HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opentdf_authz::KasError;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

/// Error body shared by every route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub title: &'static str,
    pub detail: String,
    pub status: u16,
}

#[derive(Debug)]
pub struct ApiError(pub KasError);

impl From<KasError> for ApiError {
    fn from(err: KasError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn body(&self) -> ErrorBody {
        let err = &self.0;
        let detail = if err.is_internal() {
            let correlation_id = Uuid::new_v4();
            error!(%correlation_id, code = err.error_code(), error = %err, "Internal error");
            format!("server error (correlation id {})", correlation_id)
        } else {
            if err.is_retryable() {
                warn!(code = err.error_code(), error = %err, "Downstream unavailable");
            }
            err.detail().to_string()
        };
        ErrorBody {
            title: err.title(),
            detail,
            status: err.status(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.body();
        let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_detail_is_hidden() {
        let body = ApiError(KasError::Crypto("rsa decrypt: padding".into())).body();
        assert_eq!(body.status, 500);
        assert!(body.detail.starts_with("server error (correlation id "));
        assert!(!body.detail.contains("padding"));
    }

    #[test]
    fn test_unauthorized_detail_is_fixed() {
        let body = ApiError(KasError::unauthorized("token issuer realm other does not match tdf")).body();
        assert_eq!(body.status, 401);
        assert_eq!(body.title, "Unauthorized");
        assert_eq!(body.detail, "unauthorized");
    }

    #[test]
    fn test_client_errors_keep_detail() {
        let body = ApiError(KasError::Forbidden("anyof-miss: https://ex.com/attr/Rel".into())).body();
        assert_eq!(body.status, 403);
        assert_eq!(body.title, "Forbidden");
        assert_eq!(body.detail, "anyof-miss: https://ex.com/attr/Rel");

        let body = ApiError(KasError::Unavailable("jwks".into())).body();
        assert_eq!(body.status, 503);
        assert_eq!(body.detail, "jwks");
    }
}
