use std::sync::Arc;

use axum::{
    Extension, Json,
    body::{Body, Bytes},
    extract::State,
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures_util::stream::try_unfold;
use serde::Serialize;

use crate::{
    error::AppError,
    ledger::{LedgerError, Question},
    session::{SessionId, login, logout, require_moderator},
    state::State as AppState,
    utils::{AddQuestionRequest, LoginRequest, ModifyQuestionRequest, parse_body},
    visibility::Visibility,
};

pub const EXPORT_DISPOSITION: &str = "attachment; filename=\"questions.txt\"";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatusResponse {
    pub logged_in: bool,
}

#[derive(Serialize)]
pub struct AddQuestionResponse {
    pub id: u64,
}

#[derive(Serialize)]
pub struct UpvoteResponse {
    pub upvotes: u64,
}

pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<Json<Vec<Question>>, AppError> {
    let moderator = state
        .sessions()
        .is_moderator(&session)
        .await
        .map_err(LedgerError::from)?;

    Ok(Json(state.ledger.list(&session, moderator).await?))
}

pub async fn append_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<AddQuestionResponse>, AppError> {
    let request: AddQuestionRequest = parse_body(&body)?;
    let id = state.ledger.append(&request.text).await?;

    Ok(Json(AddQuestionResponse { id }))
}

pub async fn bulk_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<StatusCode, AppError> {
    let moderator = require_moderator(state.sessions(), &session).await?;
    state.ledger.bulk_delete(&moderator).await?;

    Ok(StatusCode::OK)
}

pub async fn upvote_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> Result<Json<UpvoteResponse>, AppError> {
    let request: ModifyQuestionRequest = parse_body(&body)?;
    let upvotes = state.ledger.upvote(&session, request.id).await?;

    Ok(Json(UpvoteResponse { upvotes }))
}

pub async fn show_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    change_visibility(&state, &session, &body, Visibility::Visible).await
}

pub async fn hide_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    change_visibility(&state, &session, &body, Visibility::Hidden).await
}

pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    change_visibility(&state, &session, &body, Visibility::Deleted).await
}

async fn change_visibility(
    state: &AppState,
    session: &SessionId,
    body: &Bytes,
    visibility: Visibility,
) -> Result<StatusCode, AppError> {
    // role first, the body is not even looked at for non-moderators
    let moderator = require_moderator(state.sessions(), session).await?;
    let request: ModifyQuestionRequest = parse_body(body)?;

    state
        .ledger
        .change_visibility(&moderator, request.id, visibility)
        .await?;

    Ok(StatusCode::OK)
}

pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<Response, AppError> {
    export_questions(&state, &session, false).await
}

pub async fn export_all_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<Response, AppError> {
    export_questions(&state, &session, true).await
}

async fn export_questions(
    state: &AppState,
    session: &SessionId,
    include_hidden: bool,
) -> Result<Response, AppError> {
    let moderator = require_moderator(state.sessions(), session).await?;
    let export = state.ledger.export(&moderator, include_hidden).await?;

    let lines = try_unfold(export, |mut export| async move {
        let chunk = export.next_chunk().await?;

        Ok::<_, LedgerError>(chunk.map(|chunk| (chunk, export)))
    });

    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8"),
            (CONTENT_DISPOSITION, EXPORT_DISPOSITION),
        ],
        Body::from_stream(lines),
    )
        .into_response())
}

pub async fn login_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<Json<LoginStatusResponse>, AppError> {
    let logged_in = state
        .sessions()
        .is_moderator(&session)
        .await
        .map_err(LedgerError::from)?;

    Ok(Json(LoginStatusResponse { logged_in }))
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let request: LoginRequest = parse_body(&body)?;
    login(state.sessions(), &session, &request.password).await?;

    Ok(StatusCode::OK)
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionId>,
) -> Result<StatusCode, AppError> {
    logout(state.sessions(), &session).await?;

    Ok(StatusCode::OK)
}
