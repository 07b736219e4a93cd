use axum::http::StatusCode;
use thiserror::Error;

/// Rejected CLI flags or HTTP fields. The core never fails; only the
/// boundary does.
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("{flag} must be {requirement}")]
    OutOfRange {
        flag: &'static str,
        requirement: &'static str,
    },

    #[error("{later} must be greater than {earlier}")]
    AgeOrder {
        earlier: &'static str,
        later: &'static str,
    },

    #[error("Invalid API JSON payload: {0}")]
    Payload(String),
}

impl InputError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}
