//! # Backing Store
//!
//! Narrow interface the ledger needs from whatever holds the data.
//!
//! Every mutation here must be one atomic primitive at the storage layer. The ledger holds
//! no process-wide lock, so the stores carry all of the cross-request correctness.
//!
//! Implementations:
//! - [`crate::database::RedisStore`] for production
//! - [`crate::memory::MemoryStore`] for tests and local runs
use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::{range::IdRange, session::SessionId, visibility::Visibility};

pub const FIELD_TEXT: &str = "text";
pub const FIELD_VISIBILITY: &str = "visibility";
pub const FIELD_UPVOTES: &str = "upvotes";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt {field} field: {value:?}")]
    Corrupt { field: &'static str, value: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Physical question body. The default is what a reserved but never written id reads as.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub text: String,
    pub visibility: Visibility,
    pub upvotes: u64,
}

impl Record {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    /// Builds a record out of a field map, missing fields fall back to their defaults.
    pub fn from_fields(mut fields: HashMap<String, String>) -> StoreResult<Self> {
        let text = fields.remove(FIELD_TEXT).unwrap_or_default();

        let visibility = match fields.remove(FIELD_VISIBILITY) {
            None => Visibility::default(),
            Some(value) => value
                .parse()
                .ok()
                .and_then(Visibility::from_code)
                .ok_or(StoreError::Corrupt {
                    field: FIELD_VISIBILITY,
                    value,
                })?,
        };

        let upvotes = match fields.remove(FIELD_UPVOTES) {
            None => 0,
            Some(value) => value.parse().map_err(|_| StoreError::Corrupt {
                field: FIELD_UPVOTES,
                value,
            })?,
        };

        Ok(Self {
            text,
            visibility,
            upvotes,
        })
    }
}

/// Questions keyed by id plus the `[start, end)` counters.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Atomically increments `end` and returns the new value.
    async fn advance_end(&self) -> StoreResult<u64>;

    /// Reads `start` and `end` together in one round trip.
    async fn current_range(&self) -> StoreResult<IdRange>;

    /// Atomically sets `start` to the current `end`, returning the resulting range.
    async fn collapse_to_end(&self) -> StoreResult<IdRange>;

    /// Writes the record body in one atomic call.
    ///
    /// The id is addressable before its body lands, so `visibility` and `upvotes` are only
    /// filled in when no concurrent upvote or moderation got there first.
    async fn put(&self, id: u64, record: &Record) -> StoreResult<()>;

    /// Never fails for an unwritten id, it reads as [`Record::default`].
    async fn get(&self, id: u64) -> StoreResult<Record>;

    /// Batch read, one record per id in order.
    async fn get_many(&self, ids: Range<u64>) -> StoreResult<Vec<Record>>;

    /// Overwrites the visibility field only. Returns `false` without writing when the
    /// record is already deleted.
    async fn set_visibility(&self, id: u64, visibility: Visibility) -> StoreResult<bool>;

    /// Atomic increment, returns the new count.
    async fn increment_upvotes(&self, id: u64) -> StoreResult<u64>;
}

/// Server-side session state: moderator flag and the per-session vote set.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn is_moderator(&self, session: &SessionId) -> StoreResult<bool>;

    async fn set_moderator(&self, session: &SessionId, moderator: bool) -> StoreResult<()>;

    async fn has_voted(&self, session: &SessionId, id: u64) -> StoreResult<bool>;

    async fn mark_voted(&self, session: &SessionId, id: u64) -> StoreResult<()>;

    /// Whole vote set, so listings need one read instead of one per question.
    async fn voted(&self, session: &SessionId) -> StoreResult<HashSet<u64>>;

    /// Shared moderator secret, `None` when unset.
    async fn moderator_password(&self) -> StoreResult<Option<String>>;
}
