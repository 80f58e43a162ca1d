use axum::body::Bytes;
use serde::{Deserialize, de::DeserializeOwned};

use crate::error::AppError;

#[derive(Deserialize)]
pub struct AddQuestionRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct ModifyQuestionRequest {
    pub id: u64,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// Decodes a JSON body. Handlers take raw `Bytes` so role checks run before any parsing.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|_| AppError::MalformedPayload)
}
