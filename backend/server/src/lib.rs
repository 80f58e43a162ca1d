//! Documentation of gutefrage, a crowd-moderated question board.
//!
//! Visitors submit short questions, anyone can upvote them, and a single moderator role
//! decides what is shown.
//!
//!
//!
//! # General Infrastructure
//! - One axum server, stateless apart from per-session vote locks
//! - Redis holds everything else: question ledger, session state, moderator password
//! - Frontend is a static bundle served from `public/`
//! - Any number of request workers share the store, correctness comes from Redis atomics
//! - Every route is rate limited per path and session, 30 requests a minute with a burst of 5
//!
//!
//!
//! # Question Ledger
//!
//! **Goal**: Append, vote and moderate without ever rewriting the whole collection.
//!
//! - Ids come from `INCR`, never from "read the length, then push"
//! - Each question is one hash keyed by id: text, visibility, upvotes
//! - `[start, end)` bounds the live ids, bulk delete just moves `start` up to `end`
//! - Deleted and out-of-range questions look the same to every read and write
//! - New questions start hidden until the moderator shows them
//!
//!
//!
//! # Voting
//!
//! - One vote per session per question, tracked in the session's vote set
//! - The question itself does not know who voted, the "upvoted" flag is derived per viewer
//! - Requests of the same session are serialized around the vote, so a double click counts once
//! - Different sessions never wait on each other, their increments are atomic in Redis
//!
//!
//!
//! # Notes
//!
//! ## Bulk delete vs. append
//! A question appended while a bulk delete runs may or may not survive it. The collapse uses
//! whatever `end` Redis holds at that instant. Deliberately not linearized further.
//!
//! ## Upvote ordering
//! The increment happens before the vote is recorded. If recording fails, the client sees an
//! error and a retry counts again. Over-counting is the lesser evil compared to a lost vote.
//!
//!
//!
//! # Setup
//!
//! Generate a session key.
//! ```sh
//! cargo run -- --generate-session-key
//! ```
//!
//! Run against a local Redis.
//! ```sh
//! SESSION_KEY=... RUST_LOG=info cargo run -- --redis-address localhost:6379
//! ```
//!
//! Run without Redis.
//! ```sh
//! MODERATOR_PASSWORD=hunter2 RUST_LOG=info cargo run -- --memory
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    middleware::from_fn_with_state,
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod limit;
pub mod memory;
pub mod range;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;
pub mod visibility;

use config::Config;
use limit::SessionPathKey;
use routes::{
    append_handler, bulk_delete_handler, delete_handler, export_all_handler, export_handler,
    hide_handler, list_handler, login_handler, login_status_handler, logout_handler,
    show_handler, upvote_handler,
};
use session::session_layer;
use state::State;

pub fn init_tracing() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
}

pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    let rate_limit = state.config.rate_limit;
    let limiter = GovernorConfigBuilder::default()
        .key_extractor(SessionPathKey)
        .period(rate_limit.period())
        .burst_size(rate_limit.burst())
        .finish()
        .expect("Rate limit misconfigured!");

    let public = &state.config.public_dir;

    Router::new()
        .route(
            "/api/questions",
            get(list_handler)
                .post(append_handler)
                .delete(bulk_delete_handler),
        )
        .route("/api/upvote", post(upvote_handler))
        .route("/api/show", post(show_handler))
        .route("/api/hide", post(hide_handler))
        .route("/api/delete", post(delete_handler))
        .route("/api/export", get(export_handler))
        .route("/api/exportall", get(export_all_handler))
        .route("/api/login", get(login_status_handler).post(login_handler))
        .route("/api/logout", post(logout_handler))
        .route_service("/", ServeFile::new(public.join("index.html")))
        .nest_service("/build", ServeDir::new(public.join("build")))
        .layer(GovernorLayer {
            config: Arc::new(limiter),
        })
        .layer(from_fn_with_state(state.clone(), session_layer))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(config: Config) {
    info!("Initializing state...");
    let state = State::new(config).await;

    info!("Starting server...");

    let address = state.config.listen_address.clone();
    let app = app(state);

    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .expect("Failed to bind listen address");
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    info!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
