use std::sync::Arc;

use tracing::info;

use super::{
    config::Config,
    database::RedisStore,
    ledger::Ledger,
    memory::MemoryStore,
    store::{QuestionStore, SessionStore},
};

pub struct State {
    pub config: Config,
    pub ledger: Ledger,
}

impl State {
    pub async fn new(config: Config) -> Arc<Self> {
        if config.memory {
            info!("Using in-memory store, nothing survives a restart");
            let store = Arc::new(match &config.moderator_password {
                Some(password) => MemoryStore::with_password(password.clone()),
                None => MemoryStore::new(),
            });

            return Self::with_stores(config, store.clone(), store);
        }

        let store = Arc::new(RedisStore::connect(&config.redis_url).await);

        Self::with_stores(config, store.clone(), store)
    }

    pub fn with_stores(
        config: Config,
        questions: Arc<dyn QuestionStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            ledger: Ledger::new(questions, sessions),
        })
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.ledger.sessions()
    }
}
