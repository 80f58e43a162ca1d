//! # Rate Limiting
//!
//! GCRA buckets in front of every route, keyed by request path and session id.
//!
//! - The session layer runs first, so every request already carries a [`SessionId`]
//! - Hammering one endpoint does not eat into the quota of another
//! - Over quota is answered with 429 before any handler or store is touched
use std::time::Duration;

use axum::http::Request;
use tower_governor::{GovernorError, key_extractor::KeyExtractor};

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            per_minute: 30,
            burst: 5,
        }
    }
}

impl RateLimit {
    /// Time it takes to earn back one request.
    pub fn period(&self) -> Duration {
        Duration::from_secs(60) / self.per_minute.max(1)
    }

    pub fn burst(&self) -> u32 {
        self.burst.max(1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPathKey;

impl KeyExtractor for SessionPathKey {
    type Key = (String, SessionId);

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let session = req
            .extensions()
            .get::<SessionId>()
            .copied()
            .ok_or(GovernorError::UnableToExtractKey)?;

        Ok((req.uri().path().to_string(), session))
    }
}
