// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::vault::VaultError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// JSON error body.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "access_denied", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Input(m) => Self::bad_request(m),
            VaultError::AccessDenied(m) => Self::forbidden(m),
            VaultError::NotFound(m) => Self::not_found(m),
            VaultError::Ledger(e) => {
                tracing::error!(error = %e, "Ledger failure");
                Self::new(StatusCode::BAD_GATEWAY, "ledger_unavailable", e.to_string())
            }
            VaultError::Crypto(e) => {
                tracing::error!(error = %e, "Crypto failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "crypto_error", "cryptographic operation failed")
            }
            VaultError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "storage unavailable")
            }
            other @ (VaultError::Config(_) | VaultError::Internal(_)) => {
                tracing::error!(error = %other, "Internal failure");
                Self::internal("internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    use crate::crypto::CryptoError;
    use crate::storage::StorageError;

    #[test]
    fn constructors_set_status_and_message() {
        let nf = ApiError::not_found("missing");
        assert_eq!(nf.status, StatusCode::NOT_FOUND);
        assert_eq!(nf.message, "missing");

        let bad = ApiError::bad_request("bad");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.code, "invalid_input");

        let unauth = ApiError::unauthorized("no token");
        assert_eq!(unauth.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn vault_errors_map_to_statuses() {
        let cases = [
            (VaultError::Input("x".into()), StatusCode::BAD_REQUEST),
            (VaultError::AccessDenied("x".into()), StatusCode::FORBIDDEN),
            (VaultError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (VaultError::Crypto(CryptoError::Decryption), StatusCode::INTERNAL_SERVER_ERROR),
            (
                VaultError::Storage(StorageError::NotInitialized),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                VaultError::Ledger(crate::ledger::LedgerError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (VaultError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = ApiError::from(VaultError::Storage(StorageError::Unavailable(
            "/data/documents is read-only".into(),
        )));
        assert!(!err.message.contains("/data"));
    }

    #[tokio::test]
    async fn into_response_returns_json_body() {
        let response = ApiError::bad_request("bad data").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body_bytes.to_vec()).unwrap();
        assert_eq!(body, r#"{"error":"bad data","error_code":"invalid_input"}"#);
    }
}
