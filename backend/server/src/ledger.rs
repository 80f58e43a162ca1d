//! # Question Ledger
//!
//! Append-mostly collection of questions on top of the stores.
//!
//! ## Pieces
//! - Record store: question bodies keyed by id ([`QuestionStore`])
//! - Allocator: `INCR` on `end` ([`allocate`])
//! - Range tracker: `[start, end)`, collapsed in O(1) by bulk delete ([`IdRange`])
//! - Vote dedup: per-session set of upvoted ids ([`SessionStore`])
//! - Visibility: Hidden / Visible / Deleted ([`Visibility`])
//!
//! ## Known tradeoffs
//! - `append` is not transactional. An id whose body write failed stays issued and reads as
//!   an empty hidden question.
//! - `upvote` increments before it marks the vote. If the mark fails, a retry counts twice.
//! - `bulk_delete` racing an `append` may or may not swallow the new question, depending on
//!   which of them reaches `end` first.
use std::{collections::HashSet, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
    range::{IdRange, allocate},
    session::{Moderator, SessionId, SessionLocks},
    store::{QuestionStore, Record, SessionStore, StoreError},
    visibility::{Visibility, effectively_deleted},
};

pub const MAX_QUESTION_LEN: usize = 500;

/// Ids fetched per batch read when walking the range.
pub const LIST_BATCH: u64 = 256;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Empty question")]
    EmptyInput,

    #[error("Question too large")]
    TooLarge,

    #[error("Question not found")]
    NotFound,

    #[error("Already upvoted")]
    AlreadyVoted,

    #[error("Forbidden")]
    Forbidden,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

/// A question as one particular viewer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub id: u64,
    pub text: String,
    pub upvotes: u64,
    pub visibility: Visibility,
    pub upvoted: bool,
}

pub fn validate(text: &str) -> Result<(), LedgerError> {
    if text.is_empty() {
        return Err(LedgerError::EmptyInput);
    }

    if text.chars().count() > MAX_QUESTION_LEN {
        return Err(LedgerError::TooLarge);
    }

    Ok(())
}

#[derive(Clone)]
pub struct Ledger {
    questions: Arc<dyn QuestionStore>,
    sessions: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
}

impl Ledger {
    pub fn new(questions: Arc<dyn QuestionStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            questions,
            sessions,
            locks: Arc::new(SessionLocks::default()),
        }
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub async fn append(&self, text: &str) -> Result<u64, LedgerError> {
        validate(text)?;

        let id = allocate(self.questions.as_ref()).await?;
        self.questions.put(id, &Record::new(text)).await?;

        #[cfg(feature = "verbose")]
        tracing::debug!(id, "Appended question");

        Ok(id)
    }

    /// Single addressable question, `NotFound` when effectively deleted.
    pub async fn get(&self, id: u64) -> Result<Record, LedgerError> {
        let range = self.questions.current_range().await?;
        if !range.contains(id) {
            return Err(LedgerError::NotFound);
        }

        let record = self.questions.get(id).await?;
        if effectively_deleted(&range, id, record.visibility) {
            return Err(LedgerError::NotFound);
        }

        Ok(record)
    }

    /// Questions the viewer may see, ascending by id.
    pub async fn list(
        &self,
        session: &SessionId,
        moderator: bool,
    ) -> Result<Vec<Question>, LedgerError> {
        let voted: HashSet<u64> = self.sessions.voted(session).await?;
        let mut cursor = Cursor::new(self.questions.clone(), moderator).await?;

        let mut questions = Vec::new();
        while let Some(batch) = cursor.next_batch().await? {
            questions.extend(batch.into_iter().map(|(id, record)| Question {
                id,
                text: record.text,
                upvotes: record.upvotes,
                visibility: record.visibility,
                upvoted: voted.contains(&id),
            }));
        }

        Ok(questions)
    }

    pub async fn upvote(&self, session: &SessionId, id: u64) -> Result<u64, LedgerError> {
        let _guard = self.locks.acquire(session).await;

        self.get(id).await?;

        if self.sessions.has_voted(session, id).await? {
            return Err(LedgerError::AlreadyVoted);
        }

        let upvotes = self.questions.increment_upvotes(id).await?;
        self.sessions.mark_voted(session, id).await?;

        #[cfg(feature = "verbose")]
        tracing::debug!(id, upvotes, %session, "Upvoted question");

        Ok(upvotes)
    }

    pub async fn change_visibility(
        &self,
        _moderator: &Moderator,
        id: u64,
        visibility: Visibility,
    ) -> Result<(), LedgerError> {
        let range = self.questions.current_range().await?;
        if !range.contains(id) {
            return Err(LedgerError::NotFound);
        }

        if !self.questions.set_visibility(id, visibility).await? {
            return Err(LedgerError::NotFound);
        }

        info!(id, visibility = visibility.code(), "Changed visibility");

        Ok(())
    }

    /// Makes every question that exists right now permanently unaddressable in one step.
    pub async fn bulk_delete(&self, _moderator: &Moderator) -> Result<IdRange, LedgerError> {
        let range = self.questions.collapse_to_end().await?;
        info!(start = range.start, "Bulk deleted questions");

        Ok(range)
    }

    /// Lazy export of question texts. The range is fixed when this returns.
    pub async fn export(
        &self,
        _moderator: &Moderator,
        include_hidden: bool,
    ) -> Result<Export, LedgerError> {
        let cursor = Cursor::new(self.questions.clone(), include_hidden).await?;

        Ok(Export { cursor })
    }
}

/// Walks a snapshot of the range in batches, skipping what the viewer may not see.
pub struct Cursor {
    questions: Arc<dyn QuestionStore>,
    batches: Box<dyn Iterator<Item = std::ops::Range<u64>> + Send>,
    range: IdRange,
    include_hidden: bool,
}

impl Cursor {
    pub async fn new(
        questions: Arc<dyn QuestionStore>,
        include_hidden: bool,
    ) -> Result<Self, LedgerError> {
        let range = questions.current_range().await?;

        Ok(Self {
            questions,
            batches: Box::new(range.batches(LIST_BATCH)),
            range,
            include_hidden,
        })
    }

    /// `None` once the range is exhausted. A batch may be empty after filtering.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<(u64, Record)>>, LedgerError> {
        let Some(ids) = self.batches.next() else {
            return Ok(None);
        };

        let records = self.questions.get_many(ids.clone()).await?;

        Ok(Some(
            ids.zip(records)
                .filter(|(id, record)| {
                    !effectively_deleted(&self.range, *id, record.visibility)
                        && record.visibility.visible_to(self.include_hidden)
                })
                .collect(),
        ))
    }
}

pub struct Export {
    cursor: Cursor,
}

impl Export {
    /// Next chunk of newline-terminated lines, `None` when done.
    pub async fn next_chunk(&mut self) -> Result<Option<String>, LedgerError> {
        let Some(batch) = self.cursor.next_batch().await? else {
            return Ok(None);
        };

        let mut chunk = String::new();
        for (_, record) in batch {
            chunk.push_str(&record.text);
            chunk.push('\n');
        }

        Ok(Some(chunk))
    }

    pub async fn collect(mut self) -> Result<String, LedgerError> {
        let mut out = String::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.push_str(&chunk);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, ops::Range, sync::Arc};

    use async_trait::async_trait;

    use super::{Ledger, LedgerError, MAX_QUESTION_LEN};
    use crate::{
        memory::MemoryStore,
        range::IdRange,
        session::{Moderator, SessionId, login},
        store::{QuestionStore, Record, StoreError, StoreResult},
        visibility::Visibility,
    };

    const PASSWORD: &str = "secret";

    fn ledger() -> (Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_password(PASSWORD));
        (Ledger::new(store.clone(), store.clone()), store)
    }

    async fn moderator(ledger: &Ledger) -> Moderator {
        login(ledger.sessions(), &SessionId::new(), PASSWORD)
            .await
            .unwrap()
    }

    fn ids(questions: &[super::Question]) -> Vec<u64> {
        questions.iter().map(|q| q.id).collect()
    }

    #[tokio::test]
    async fn test_append_round_trip() {
        let (ledger, _) = ledger();
        let viewer = SessionId::new();

        let id = ledger.append("How does this work?").await.unwrap();
        assert_eq!(id, 0);

        let listed = ledger.list(&viewer, true).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "How does this work?");
        assert_eq!(listed[0].upvotes, 0);
        assert_eq!(listed[0].visibility, Visibility::Hidden);
        assert!(!listed[0].upvoted);
    }

    #[tokio::test]
    async fn test_append_length_limits() {
        let (ledger, store) = ledger();

        assert!(matches!(ledger.append("").await, Err(LedgerError::EmptyInput)));
        assert!(matches!(
            ledger.append(&"a".repeat(MAX_QUESTION_LEN + 1)).await,
            Err(LedgerError::TooLarge)
        ));
        assert_eq!(store.current_range().await.unwrap(), IdRange::new(0, 0));

        assert!(ledger.append(&"a".repeat(MAX_QUESTION_LEN)).await.is_ok());
        assert!(ledger.append(&"ü".repeat(MAX_QUESTION_LEN)).await.is_ok());
    }

    #[tokio::test]
    async fn test_hidden_only_for_moderator() {
        let (ledger, _) = ledger();
        let moderator = moderator(&ledger).await;
        let viewer = SessionId::new();

        let hidden = ledger.append("hidden").await.unwrap();
        let shown = ledger.append("shown").await.unwrap();
        ledger
            .change_visibility(&moderator, shown, Visibility::Visible)
            .await
            .unwrap();

        assert_eq!(ids(&ledger.list(&viewer, false).await.unwrap()), vec![shown]);
        assert_eq!(
            ids(&ledger.list(&viewer, true).await.unwrap()),
            vec![hidden, shown]
        );
    }

    #[tokio::test]
    async fn test_deleted_is_terminal() {
        let (ledger, _) = ledger();
        let moderator = moderator(&ledger).await;
        let viewer = SessionId::new();

        let id = ledger.append("Q1").await.unwrap();
        assert_eq!(id, 0);

        ledger
            .change_visibility(&moderator, id, Visibility::Deleted)
            .await
            .unwrap();
        assert!(matches!(
            ledger
                .change_visibility(&moderator, id, Visibility::Visible)
                .await,
            Err(LedgerError::NotFound)
        ));

        assert!(ledger.list(&viewer, false).await.unwrap().is_empty());
        assert!(ledger.list(&viewer, true).await.unwrap().is_empty());
        assert!(matches!(
            ledger.upvote(&viewer, id).await,
            Err(LedgerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_upvote_once_per_session() {
        let (ledger, store) = ledger();
        let first = SessionId::new();
        let second = SessionId::new();
        let id = ledger.append("Q").await.unwrap();

        assert_eq!(ledger.upvote(&first, id).await.unwrap(), 1);
        assert!(matches!(
            ledger.upvote(&first, id).await,
            Err(LedgerError::AlreadyVoted)
        ));
        assert_eq!(store.get(id).await.unwrap().upvotes, 1);

        assert_eq!(ledger.upvote(&second, id).await.unwrap(), 2);

        let listed = ledger.list(&first, true).await.unwrap();
        assert!(listed[0].upvoted);
        assert!(!ledger.list(&SessionId::new(), true).await.unwrap()[0].upvoted);
    }

    #[tokio::test]
    async fn test_upvote_out_of_range() {
        let (ledger, _) = ledger();
        let moderator = moderator(&ledger).await;
        let session = SessionId::new();

        assert!(matches!(
            ledger.upvote(&session, 0).await,
            Err(LedgerError::NotFound)
        ));

        let old = ledger.append("old").await.unwrap();
        ledger.bulk_delete(&moderator).await.unwrap();
        let new = ledger.append("new").await.unwrap();

        assert!(matches!(
            ledger.upvote(&session, old).await,
            Err(LedgerError::NotFound)
        ));
        assert!(matches!(
            ledger.upvote(&session, new + 1).await,
            Err(LedgerError::NotFound)
        ));
        assert!(ledger.upvote(&session, new).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_delete() {
        let (ledger, store) = ledger();
        let moderator = moderator(&ledger).await;
        let viewer = SessionId::new();

        for text in ["a", "b", "c"] {
            let id = ledger.append(text).await.unwrap();
            ledger
                .change_visibility(&moderator, id, Visibility::Visible)
                .await
                .unwrap();
        }

        let range = ledger.bulk_delete(&moderator).await.unwrap();
        assert_eq!(range, IdRange::new(3, 3));
        assert!(ledger.list(&viewer, true).await.unwrap().is_empty());

        // bodies below start are kept, just unreachable
        assert_eq!(store.get(0).await.unwrap().text, "a");
        assert!(matches!(
            ledger.change_visibility(&moderator, 1, Visibility::Hidden).await,
            Err(LedgerError::NotFound)
        ));

        let id = ledger.append("x").await.unwrap();
        let listed = ledger.list(&viewer, true).await.unwrap();
        assert_eq!(ids(&listed), vec![id]);
        assert_eq!(listed[0].text, "x");
    }

    #[tokio::test]
    async fn test_reserved_id_without_body() {
        let (ledger, store) = ledger();

        // id reserved but the body write never happened
        store.advance_end().await.unwrap();
        let id = ledger.append("real").await.unwrap();

        let listed = ledger.list(&SessionId::new(), true).await.unwrap();
        assert_eq!(ids(&listed), vec![0, id]);
        assert_eq!(listed[0].text, "");
        assert_eq!(listed[0].visibility, Visibility::Hidden);
    }

    #[tokio::test]
    async fn test_late_body_write_keeps_moderation() {
        let (ledger, store) = ledger();
        let moderator = moderator(&ledger).await;
        let viewer = SessionId::new();

        // reserved, then voted on and deleted before the body write lands
        store.advance_end().await.unwrap();
        assert_eq!(ledger.upvote(&viewer, 0).await.unwrap(), 1);
        ledger
            .change_visibility(&moderator, 0, Visibility::Deleted)
            .await
            .unwrap();

        store.put(0, &Record::new("late body")).await.unwrap();

        let record = store.get(0).await.unwrap();
        assert_eq!(record.visibility, Visibility::Deleted);
        assert_eq!(record.upvotes, 1);
        assert!(ledger.list(&viewer, true).await.unwrap().is_empty());
        assert!(matches!(ledger.get(0).await, Err(LedgerError::NotFound)));
    }

    #[tokio::test]
    async fn test_export() {
        let (ledger, _) = ledger();
        let moderator = moderator(&ledger).await;

        let first = ledger.append("first").await.unwrap();
        ledger.append("second").await.unwrap();
        let third = ledger.append("third").await.unwrap();
        ledger
            .change_visibility(&moderator, first, Visibility::Visible)
            .await
            .unwrap();
        ledger
            .change_visibility(&moderator, third, Visibility::Deleted)
            .await
            .unwrap();

        let visible = ledger.export(&moderator, false).await.unwrap();
        assert_eq!(visible.collect().await.unwrap(), "first\n");

        let all = ledger.export(&moderator, true).await.unwrap();
        assert_eq!(all.collect().await.unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_list_spans_batches() {
        let (ledger, _) = ledger();
        let total = super::LIST_BATCH * 2 + 3;

        for i in 0..total {
            ledger.append(&format!("q{i}")).await.unwrap();
        }

        let listed = ledger.list(&SessionId::new(), true).await.unwrap();
        assert_eq!(ids(&listed), (0..total).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_get_distinct_ids() {
        let (ledger, store) = ledger();
        ledger.append("before").await.unwrap();

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.append(&format!("q{i}")).await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..65).collect::<Vec<_>>());
        assert_eq!(store.current_range().await.unwrap(), IdRange::new(0, 65));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upvotes() {
        let (ledger, store) = ledger();
        let id = ledger.append("Q").await.unwrap();

        // distinct sessions all count
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.upvote(&SessionId::new(), id).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get(id).await.unwrap().upvotes, 32);

        // one session double-submitting counts once
        let session = SessionId::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.upvote(&session, id).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::AlreadyVoted) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(store.get(id).await.unwrap().upvotes, 33);
    }

    // Accepted linearization ambiguity: a question appended while a bulk delete runs may
    // land on either side of the new start. Both outcomes are valid, nothing else is.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bulk_delete_racing_append_is_ambiguous() {
        for _ in 0..20 {
            let (ledger, _) = ledger();
            let moderator = moderator(&ledger).await;
            ledger.append("existing").await.unwrap();

            let appender = {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.append("racing").await.unwrap() })
            };
            let range = ledger.bulk_delete(&moderator).await.unwrap();
            let racing = appender.await.unwrap();

            assert!(range.start >= 1);

            let listed = ledger.list(&SessionId::new(), true).await.unwrap();
            let texts: Vec<_> = listed.iter().map(|q| q.text.as_str()).collect();
            if racing < range.start {
                assert!(texts.is_empty());
            } else {
                assert_eq!(texts, vec!["racing"]);
            }
        }
    }

    struct DownStore;

    #[async_trait]
    impl QuestionStore for DownStore {
        async fn advance_end(&self) -> StoreResult<u64> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn current_range(&self) -> StoreResult<IdRange> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn collapse_to_end(&self) -> StoreResult<IdRange> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn put(&self, _id: u64, _record: &Record) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn get(&self, _id: u64) -> StoreResult<Record> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn get_many(&self, _ids: Range<u64>) -> StoreResult<Vec<Record>> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn set_visibility(&self, _id: u64, _visibility: Visibility) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn increment_upvotes(&self, _id: u64) -> StoreResult<u64> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_storage_failures_surface() {
        let sessions = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(Arc::new(DownStore), sessions.clone());
        let session = SessionId::new();

        assert!(matches!(
            ledger.append("q").await,
            Err(LedgerError::StorageUnavailable(_))
        ));
        assert!(matches!(
            ledger.list(&session, false).await,
            Err(LedgerError::StorageUnavailable(_))
        ));
        assert!(matches!(
            ledger.upvote(&session, 0).await,
            Err(LedgerError::StorageUnavailable(_))
        ));

        // validation happens before any store call
        assert!(matches!(ledger.append("").await, Err(LedgerError::EmptyInput)));
        assert_eq!(
            crate::store::SessionStore::voted(sessions.as_ref(), &session)
                .await
                .unwrap(),
            HashSet::new()
        );
    }
}
