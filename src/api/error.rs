use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the lookup handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No order has this identifier.
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The request carried no order identifier.
    #[error("Missing order id")]
    MissingId,

    /// The store could not answer.
    #[error("Lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingId => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Store details stay in the logs.
        let message = match &self {
            Self::Store(_) => {
                tracing::error!(error = %self, "Request error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_status_codes() {
        fn get_status(err: ApiError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(ApiError::NotFound("o1".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(get_status(ApiError::MissingId), StatusCode::BAD_REQUEST);
        assert_eq!(
            get_status(ApiError::Store(StoreError::DataCorruption("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(ApiError::Store(StoreError::Cancelled)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
