//! # Redis
//!
//! RAM database.
//!
//! Holds the question ledger and server-side session state. Every ledger mutation maps to
//! exactly one atomic Redis call.
//!
//! ## Layout
//!
//! - `gutefrage.end`: **int** counter, ids ever allocated, `INCR` only
//! - `gutefrage.start`: **int** counter, bulk-delete low-water mark
//! - `gutefrage.question.<id>`: hash of `text` (**string**), `visibility` (**int**),
//!   `upvotes` (**int**)
//! - `gutefrage.session.<uuid>`: hash with the `authenticated` flag, TTL 30 days
//! - `gutefrage.session.<uuid>.votes`: set of upvoted ids, TTL 30 days
//! - `gutefrage.password`: moderator secret, set by the operator
//!
//! ## Atomicity
//!
//! - Allocation is `INCR gutefrage.end`, never "read length then push"
//! - Record creation is a Lua script, `HSETNX` keeps earlier upvotes and moderation
//! - Upvotes are `HINCRBY`
//! - Range reads are one `MGET` so `start`/`end` are never torn
//! - Collapse and the terminal-aware visibility write are Lua scripts, which Redis runs atomically
//!
//! ## Commands
//!
//! Set the moderator password.
//! ```sh
//! redis-cli SET gutefrage.password hunter2
//! ```
use std::{
    collections::{HashMap, HashSet},
    ops::Range,
    time::Duration,
};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{
    range::IdRange,
    session::{SESSION_TTL_DAYS, SessionId},
    store::{FIELD_UPVOTES, QuestionStore, Record, SessionStore, StoreResult},
    visibility::Visibility,
};

pub const START_KEY: &str = "gutefrage.start";
pub const END_KEY: &str = "gutefrage.end";
pub const PASSWORD_KEY: &str = "gutefrage.password";

const AUTHENTICATED: &str = "authenticated";
const SESSION_TTL_SECS: i64 = SESSION_TTL_DAYS * 24 * 60 * 60;

// KEYS[1] = start, KEYS[2] = end
const COLLAPSE_SCRIPT: &str = r"
local finish = tonumber(redis.call('GET', KEYS[2]) or '0')
local start = tonumber(redis.call('GET', KEYS[1]) or '0')
if finish > start then
    redis.call('SET', KEYS[1], finish)
    start = finish
end
return {start, finish}
";

// KEYS[1] = question, ARGV[1] = text, ARGV[2] = visibility, ARGV[3] = upvotes
const PUT_SCRIPT: &str = r"
redis.call('HSET', KEYS[1], 'text', ARGV[1])
redis.call('HSETNX', KEYS[1], 'visibility', ARGV[2])
redis.call('HSETNX', KEYS[1], 'upvotes', ARGV[3])
return 1
";

// KEYS[1] = question, ARGV[1] = new visibility, ARGV[2] = deleted
const SET_VISIBILITY_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'visibility') == ARGV[2] then
    return 0
end
redis.call('HSET', KEYS[1], 'visibility', ARGV[1])
return 1
";

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).expect("Redis URL misconfigured!");

    client
        .get_connection_manager_with_config(config)
        .await
        .expect("Redis unreachable!")
}

pub fn question_key(id: u64) -> String {
    format!("gutefrage.question.{id}")
}

pub fn session_key(session: &SessionId) -> String {
    format!("gutefrage.session.{session}")
}

pub fn votes_key(session: &SessionId) -> String {
    format!("gutefrage.session.{session}.votes")
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    collapse: Script,
    put: Script,
    set_visibility: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            collapse: Script::new(COLLAPSE_SCRIPT),
            put: Script::new(PUT_SCRIPT),
            set_visibility: Script::new(SET_VISIBILITY_SCRIPT),
        }
    }

    pub async fn connect(redis_url: &str) -> Self {
        Self::new(init_redis(redis_url).await)
    }
}

#[async_trait]
impl QuestionStore for RedisStore {
    async fn advance_end(&self) -> StoreResult<u64> {
        let mut connection = self.connection.clone();
        let end: u64 = connection.incr(END_KEY, 1).await?;

        Ok(end)
    }

    async fn current_range(&self) -> StoreResult<IdRange> {
        let mut connection = self.connection.clone();
        let (start, end): (Option<u64>, Option<u64>) = redis::cmd("MGET")
            .arg(START_KEY)
            .arg(END_KEY)
            .query_async(&mut connection)
            .await?;

        Ok(IdRange::new(start.unwrap_or(0), end.unwrap_or(0)))
    }

    async fn collapse_to_end(&self) -> StoreResult<IdRange> {
        let mut connection = self.connection.clone();
        let (start, end): (u64, u64) = self
            .collapse
            .key(START_KEY)
            .key(END_KEY)
            .invoke_async(&mut connection)
            .await?;

        Ok(IdRange::new(start, end))
    }

    async fn put(&self, id: u64, record: &Record) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let _: u8 = self
            .put
            .key(question_key(id))
            .arg(&record.text)
            .arg(record.visibility.code())
            .arg(record.upvotes)
            .invoke_async(&mut connection)
            .await?;

        Ok(())
    }

    async fn get(&self, id: u64) -> StoreResult<Record> {
        let mut connection = self.connection.clone();
        let fields: HashMap<String, String> = connection.hgetall(question_key(id)).await?;

        Record::from_fields(fields)
    }

    async fn get_many(&self, ids: Range<u64>) -> StoreResult<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(question_key(id));
        }

        let mut connection = self.connection.clone();
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut connection).await?;

        rows.into_iter().map(Record::from_fields).collect()
    }

    async fn set_visibility(&self, id: u64, visibility: Visibility) -> StoreResult<bool> {
        let mut connection = self.connection.clone();
        let applied: u8 = self
            .set_visibility
            .key(question_key(id))
            .arg(visibility.code())
            .arg(Visibility::Deleted.code())
            .invoke_async(&mut connection)
            .await?;

        Ok(applied == 1)
    }

    async fn increment_upvotes(&self, id: u64) -> StoreResult<u64> {
        let mut connection = self.connection.clone();
        let upvotes: u64 = connection
            .hincr(question_key(id), FIELD_UPVOTES, 1)
            .await?;

        Ok(upvotes)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn is_moderator(&self, session: &SessionId) -> StoreResult<bool> {
        let mut connection = self.connection.clone();
        let flag: Option<u8> = connection.hget(session_key(session), AUTHENTICATED).await?;

        Ok(flag == Some(1))
    }

    async fn set_moderator(&self, session: &SessionId, moderator: bool) -> StoreResult<()> {
        let key = session_key(session);
        let mut connection = self.connection.clone();

        let () = redis::pipe()
            .atomic()
            .hset(&key, AUTHENTICATED, u8::from(moderator))
            .ignore()
            .expire(&key, SESSION_TTL_SECS)
            .ignore()
            .query_async(&mut connection)
            .await?;

        Ok(())
    }

    async fn has_voted(&self, session: &SessionId, id: u64) -> StoreResult<bool> {
        let mut connection = self.connection.clone();
        let voted: bool = connection.sismember(votes_key(session), id).await?;

        Ok(voted)
    }

    async fn mark_voted(&self, session: &SessionId, id: u64) -> StoreResult<()> {
        let key = votes_key(session);
        let mut connection = self.connection.clone();

        let () = redis::pipe()
            .atomic()
            .sadd(&key, id)
            .ignore()
            .expire(&key, SESSION_TTL_SECS)
            .ignore()
            .query_async(&mut connection)
            .await?;

        Ok(())
    }

    async fn voted(&self, session: &SessionId) -> StoreResult<HashSet<u64>> {
        let mut connection = self.connection.clone();
        let votes: HashSet<u64> = connection.smembers(votes_key(session)).await?;

        Ok(votes)
    }

    async fn moderator_password(&self) -> StoreResult<Option<String>> {
        let mut connection = self.connection.clone();
        let password: Option<String> = connection.get(PASSWORD_KEY).await?;

        Ok(password)
    }
}
