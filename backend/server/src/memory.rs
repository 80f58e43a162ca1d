//! In-memory implementation of both store traits.
//!
//! Each trait method takes one lock for its whole body, which gives the same
//! one-call-one-atomic-step behaviour as the Redis commands it stands in for.
use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{
    range::IdRange,
    session::SessionId,
    store::{QuestionStore, Record, SessionStore, StoreResult},
    visibility::Visibility,
};

#[derive(Default)]
struct SessionState {
    moderator: bool,
    votes: HashSet<u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    range: Mutex<IdRange>,
    records: RwLock<HashMap<u64, Record>>,
    sessions: RwLock<HashMap<SessionId, SessionState>>,
    password: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn advance_end(&self) -> StoreResult<u64> {
        let mut range = self.range.lock();
        range.end += 1;

        Ok(range.end)
    }

    async fn current_range(&self) -> StoreResult<IdRange> {
        Ok(*self.range.lock())
    }

    async fn collapse_to_end(&self) -> StoreResult<IdRange> {
        let mut range = self.range.lock();
        range.start = range.end;

        Ok(*range)
    }

    async fn put(&self, id: u64, record: &Record) -> StoreResult<()> {
        self.records
            .write()
            .entry(id)
            .and_modify(|existing| existing.text.clone_from(&record.text))
            .or_insert_with(|| record.clone());

        Ok(())
    }

    async fn get(&self, id: u64) -> StoreResult<Record> {
        Ok(self.records.read().get(&id).cloned().unwrap_or_default())
    }

    async fn get_many(&self, ids: Range<u64>) -> StoreResult<Vec<Record>> {
        let records = self.records.read();

        Ok(ids
            .map(|id| records.get(&id).cloned().unwrap_or_default())
            .collect())
    }

    async fn set_visibility(&self, id: u64, visibility: Visibility) -> StoreResult<bool> {
        let mut records = self.records.write();
        let record = records.entry(id).or_default();

        match record.visibility.transition(visibility) {
            Some(next) => {
                record.visibility = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_upvotes(&self, id: u64) -> StoreResult<u64> {
        let mut records = self.records.write();
        let record = records.entry(id).or_default();
        record.upvotes += 1;

        Ok(record.upvotes)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn is_moderator(&self, session: &SessionId) -> StoreResult<bool> {
        Ok(self
            .sessions
            .read()
            .get(session)
            .is_some_and(|state| state.moderator))
    }

    async fn set_moderator(&self, session: &SessionId, moderator: bool) -> StoreResult<()> {
        self.sessions.write().entry(*session).or_default().moderator = moderator;

        Ok(())
    }

    async fn has_voted(&self, session: &SessionId, id: u64) -> StoreResult<bool> {
        Ok(self
            .sessions
            .read()
            .get(session)
            .is_some_and(|state| state.votes.contains(&id)))
    }

    async fn mark_voted(&self, session: &SessionId, id: u64) -> StoreResult<()> {
        self.sessions
            .write()
            .entry(*session)
            .or_default()
            .votes
            .insert(id);

        Ok(())
    }

    async fn voted(&self, session: &SessionId) -> StoreResult<HashSet<u64>> {
        Ok(self
            .sessions
            .read()
            .get(session)
            .map(|state| state.votes.clone())
            .unwrap_or_default())
    }

    async fn moderator_password(&self) -> StoreResult<Option<String>> {
        Ok(self.password.clone())
    }
}
