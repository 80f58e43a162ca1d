//! # Sessions
//!
//! Cookie-bound identity used for moderator auth and per-viewer vote dedup.
//!
//! - Cookie `session` holds a UUID v4, signed with `SESSION_KEY`
//! - State (moderator flag, vote set) stays server-side in the [`SessionStore`]
//! - A missing or tampered cookie gets a fresh session on the way out
//!
//! A session is not an account. One vote per session per question is a weak identity on
//! purpose: clearing cookies gets you another vote.
use std::{collections::HashMap, fmt, sync::Arc};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use parking_lot::Mutex;
use time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{ledger::LedgerError, state::State as AppState, store::SessionStore};

pub const SESSION_COOKIE: &str = "session";

/// Lifetime of the cookie and of the server-side session keys behind it.
pub const SESSION_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn session_cookie(session: SessionId) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(SESSION_TTL_DAYS))
        .build()
}

/// Resolves the caller's session and makes it available as an `Extension<SessionId>`.
pub async fn session_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = SignedCookieJar::from_headers(request.headers(), state.config.session_key.clone());

    let existing = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| SessionId::parse(cookie.value()));

    let (session, fresh) = match existing {
        Some(session) => (session, false),
        None => (SessionId::new(), true),
    };

    #[cfg(feature = "verbose")]
    tracing::debug!(%session, fresh, "Resolved session");

    request.extensions_mut().insert(session);
    let response = next.run(request).await;

    if fresh {
        (jar.add(session_cookie(session)), response).into_response()
    } else {
        response
    }
}

/// Proof that the holder's session is logged in as moderator.
///
/// Moderator-only ledger operations take a `&Moderator`, so the role check cannot be
/// skipped by a caller.
#[derive(Debug)]
pub struct Moderator {
    _private: (),
}

pub async fn require_moderator(
    sessions: &dyn SessionStore,
    session: &SessionId,
) -> Result<Moderator, LedgerError> {
    if sessions.is_moderator(session).await? {
        Ok(Moderator { _private: () })
    } else {
        Err(LedgerError::Forbidden)
    }
}

pub async fn login(
    sessions: &dyn SessionStore,
    session: &SessionId,
    password: &str,
) -> Result<Moderator, LedgerError> {
    let Some(expected) = sessions.moderator_password().await? else {
        warn!("Login attempt with no moderator password configured");
        return Err(LedgerError::Forbidden);
    };

    if password != expected {
        info!(%session, "Rejected moderator login");
        return Err(LedgerError::Forbidden);
    }

    sessions.set_moderator(session, true).await?;
    info!(%session, "Moderator logged in");

    Ok(Moderator { _private: () })
}

pub async fn logout(sessions: &dyn SessionStore, session: &SessionId) -> Result<(), LedgerError> {
    sessions.set_moderator(session, false).await?;

    Ok(())
}

/// Per-session exclusivity for the vote check-increment-mark sequence.
///
/// Only requests of the same session wait on each other. An entry counts every request
/// that holds or waits for it, and is removed when the last one is gone, including
/// requests dropped while still waiting.
#[derive(Default)]
pub struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Entry>>,
}

#[derive(Default)]
struct Entry {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

struct Registration<'a> {
    locks: &'a SessionLocks,
    session: SessionId,
}

pub struct SessionGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<'a>,
}

impl SessionLocks {
    pub async fn acquire(&self, session: &SessionId) -> SessionGuard<'_> {
        let lock = {
            let mut inner = self.inner.lock();
            let entry = inner.entry(*session).or_default();
            entry.users += 1;
            entry.lock.clone()
        };

        let registration = Registration {
            locks: self,
            session: *session,
        };
        let guard = lock.lock_owned().await;

        SessionGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut inner = self.locks.inner.lock();

        if let Some(entry) = inner.get_mut(&self.session) {
            entry.users -= 1;
            if entry.users == 0 {
                inner.remove(&self.session);
            }
        }
    }
}
