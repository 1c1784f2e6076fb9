use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::exchange::ExchangeError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

// Reasons the poller supervisor refuses to start a refresh loop.
#[derive(Error, Debug)]
pub enum PollerError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("poller supervisor is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Unsupported(_) | ExchangeError::BadSymbol(_) => {
                ApiError::NotFound(err.to_string())
            }
            ExchangeError::InvalidParameter(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Upstream("Upstream fetch failed".to_string()),
        }
    }
}

impl From<PollerError> for ApiError {
    fn from(err: PollerError) -> Self {
        match err {
            PollerError::Exchange(e) => e.into(),
            PollerError::ShuttingDown => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse { error: self.to_string() };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_errors_map_to_status() {
        let cases = [
            (ExchangeError::Unsupported("kraken2".into()), StatusCode::NOT_FOUND),
            (ExchangeError::BadSymbol("NOPE".into()), StatusCode::NOT_FOUND),
            (ExchangeError::InvalidParameter("timeframe 7m".into()), StatusCode::BAD_REQUEST),
            (ExchangeError::RateLimited, StatusCode::BAD_GATEWAY),
            (ExchangeError::Timeout, StatusCode::BAD_GATEWAY),
            (ExchangeError::Closed, StatusCode::BAD_GATEWAY),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_upstream_detail_is_not_leaked() {
        let err = ApiError::from(ExchangeError::Upstream {
            status: 500,
            message: "internal stack trace".into(),
        });
        assert_eq!(err.to_string(), "Upstream fetch failed");
    }

    #[test]
    fn test_shutting_down_is_unavailable() {
        let err = ApiError::from(PollerError::ShuttingDown);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
