use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use axum_extra::extract::cookie::Key;
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{info, warn};

use crate::limit::RateLimit;

pub struct Config {
    pub listen_address: String,
    pub redis_url: String,
    pub public_dir: PathBuf,
    pub session_key: Key,
    pub memory: bool,
    /// Only used by the in-memory store, Redis keeps it under `gutefrage.password`.
    pub moderator_password: Option<String>,
    pub rate_limit: RateLimit,
}

impl Config {
    pub fn load() -> Self {
        Self {
            listen_address: try_load("LISTEN_ADDRESS", "0.0.0.0:8000"),
            redis_url: try_load("REDIS_URL", "redis://localhost:6379"),
            public_dir: try_load("PUBLIC_DIR", "public"),
            session_key: load_session_key(),
            memory: false,
            moderator_password: var("MODERATOR_PASSWORD").ok(),
            rate_limit: RateLimit {
                per_minute: try_load("RATE_LIMIT_PER_MINUTE", "30"),
                burst: try_load("RATE_LIMIT_BURST", "5"),
            },
        }
    }
}

/// Fresh signing key, base64 encoded the way `SESSION_KEY` expects it.
pub fn generate_session_key() -> String {
    STANDARD.encode(Key::generate().master())
}

pub fn decode_session_key(encoded: &str) -> Option<Key> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;

    Key::try_from(bytes.as_slice()).ok()
}

fn load_session_key() -> Key {
    let Ok(encoded) = var("SESSION_KEY").or_else(|_| read_secret("SESSION_KEY")) else {
        warn!("No SESSION_KEY, using a random key, sessions will not survive a restart");
        return Key::generate();
    };

    decode_session_key(&encoded)
        .ok_or_else(|| {
            warn!("SESSION_KEY must be base64 of at least 64 bytes");
        })
        .expect("Secrets misconfigured!")
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> Result<String, ()> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path).map(|s| s.trim().to_string()).map_err(|e| {
        warn!("Failed to read {secret_name} from file: {e}");
    })
}
