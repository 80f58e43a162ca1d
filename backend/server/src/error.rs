use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::ledger::LedgerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Ledger(err) => match err {
                LedgerError::EmptyInput => StatusCode::BAD_REQUEST,
                LedgerError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                LedgerError::NotFound => StatusCode::NOT_FOUND,
                LedgerError::AlreadyVoted => StatusCode::CONFLICT,
                LedgerError::Forbidden => StatusCode::FORBIDDEN,
                LedgerError::StorageUnavailable(source) => {
                    error!("Storage call failed: {source}");

                    return (StatusCode::INTERNAL_SERVER_ERROR, "Storage unavailable")
                        .into_response();
                }
            },
        };

        (status, self.to_string()).into_response()
    }
}
