use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Unsupported exchange: {0}")]
    Unsupported(String),

    #[error("Unknown symbol: {0}")]
    BadSymbol(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Rate limited by exchange")]
    RateLimited,

    #[error("Exchange request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Exchange returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Failed to decode exchange response: {0}")]
    Decode(String),

    #[error("Exchange client is closed")]
    Closed,
}

impl ExchangeError {
    // True when retrying the same request can never succeed.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::Unsupported(_) | ExchangeError::BadSymbol(_) | ExchangeError::InvalidParameter(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else if err.is_decode() {
            ExchangeError::Decode(err.to_string())
        } else {
            ExchangeError::Http(err)
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
